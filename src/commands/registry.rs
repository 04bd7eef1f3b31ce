use std::collections::BTreeMap;
use std::sync::Arc;

use crate::commands::descriptor::CommandDescriptor;
use crate::error::CommandError;

/// Commands by name, in name order.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Arc<CommandDescriptor>>,
}

impl CommandRegistry {
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), CommandError> {
        if self.commands.contains_key(descriptor.name) {
            return Err(CommandError::DuplicateCommand(descriptor.name.to_string()));
        }
        self.commands.insert(descriptor.name, Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.commands.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    /// Commands kept by `include` (all when empty) minus those in `exclude`.
    pub fn commands(&self, include: &[&str], exclude: &[&str]) -> Vec<Arc<CommandDescriptor>> {
        self.commands
            .iter()
            .filter(|(name, _)| include.is_empty() || include.contains(name))
            .filter(|(name, _)| !exclude.contains(name))
            .map(|(_, descriptor)| Arc::clone(descriptor))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::default();
        for name in ["run", "clean", "make"] {
            registry
                .register(CommandDescriptor::new(name, |_, _| Ok(None)))
                .unwrap();
        }
        registry
    }

    fn names(commands: Vec<Arc<CommandDescriptor>>) -> Vec<&'static str> {
        commands.iter().map(|c| c.name).collect()
    }

    #[test]
    fn listing_is_sorted_and_repeatable() {
        let registry = registry();
        assert_eq!(names(registry.commands(&[], &[])), vec!["clean", "make", "run"]);
        assert_eq!(
            names(registry.commands(&[], &[])),
            names(registry.commands(&[], &[]))
        );
    }

    #[test]
    fn include_and_exclude_filters() {
        let registry = registry();
        assert_eq!(names(registry.commands(&["make", "run"], &[])), vec!["make", "run"]);
        assert_eq!(names(registry.commands(&[], &["clean"])), vec!["make", "run"]);
        assert_eq!(names(registry.commands(&["make"], &["make"])), Vec::<&str>::new());
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut registry = registry();
        let err = registry
            .register(CommandDescriptor::new("make", |_, _| Ok(None)))
            .unwrap_err();
        assert!(matches!(err, CommandError::DuplicateCommand(name) if name == "make"));
    }
}
