use std::collections::HashMap;
use std::io::{self, BufRead, Write};

/// Defect categories that carry sticky "apply to all / none" decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixCategory {
    RemoveEmptyAttributes,
    RemoveUnknownAttributes,
    FixNormalisation,
    FixDnGuids,
    RemoveDeletedDnLinks,
    FixTargetMismatch,
    FixMetadata,
    FixTimeMetadata,
    FixMissingBacklinks,
    FixOrphanedBacklinks,
    FixRmdFlags,
    SeizeFsmoRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    AllFromNow,
    NoneFromNow,
}

pub trait Prompter {
    fn ask(&mut self, prompt: &str, allow_all: bool) -> Answer;
}

/// Interactive prompter reading answers from stdin.
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn ask(&mut self, prompt: &str, allow_all: bool) -> Answer {
        let choices = if allow_all { "[y/n/all/none]" } else { "[y/n]" };
        let stdin = io::stdin();

        loop {
            print!("{prompt} {choices} ");
            if io::stdout().flush().is_err() {
                return Answer::No;
            }

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return Answer::No,
                Ok(_) => {}
            }

            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Answer::Yes,
                "n" | "no" => return Answer::No,
                "all" if allow_all => return Answer::AllFromNow,
                "none" if allow_all => return Answer::NoneFromNow,
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CategoryState {
    Ask,
    AllApproved,
    AllDeclined,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmOptions {
    pub fix: bool,
    pub yes: bool,
    pub quiet: bool,
}

/// Per-session confirmation state: one tri-state slot per defect category,
/// owned by the checking session and never reset within it.
#[derive(Debug, Default)]
pub struct ConfirmationState {
    categories: HashMap<FixCategory, CategoryState>,
}

impl ConfirmationState {
    /// Categorised confirmation with sticky all/none semantics.
    pub fn decide(
        &mut self,
        options: ConfirmOptions,
        prompter: &mut dyn Prompter,
        prompt: &str,
        category: FixCategory,
    ) -> bool {
        if !options.fix {
            return false;
        }
        if options.quiet {
            return options.yes;
        }

        match self.categories.get(&category).copied() {
            Some(CategoryState::AllDeclined) => return false,
            Some(CategoryState::AllApproved) => return true,
            Some(CategoryState::Ask) | None => {}
        }

        if options.yes {
            return true;
        }

        match prompter.ask(prompt, true) {
            Answer::Yes => true,
            Answer::No => false,
            Answer::AllFromNow => {
                self.categories.insert(category, CategoryState::AllApproved);
                true
            }
            Answer::NoneFromNow => {
                self.categories.insert(category, CategoryState::AllDeclined);
                false
            }
        }
    }

    /// One-off confirmation with no persisted state.
    pub fn decide_once(
        &mut self,
        options: ConfirmOptions,
        prompter: &mut dyn Prompter,
        prompt: &str,
    ) -> bool {
        if !options.fix {
            return false;
        }
        if options.quiet {
            return options.yes;
        }
        if options.yes {
            return true;
        }
        matches!(prompter.ask(prompt, false), Answer::Yes)
    }
}
