use std::any::Any;

use crate::core::{MigrationId, Result, SENTINEL_MIGRATION_ID, SaveError, SaveId};
use crate::save::Save;

/// One ordered, idempotent schema-upgrade step for a save type.
pub trait MigrationRule<T: Save>: Send {
    /// Rules are totally ordered by id within a chain.
    fn id(&self) -> MigrationId;

    /// Whether `stored` marks a save last written under this rule.
    fn matches(&self, stored: MigrationId) -> bool {
        stored == self.id()
    }

    /// Upgrades the payload in place.
    fn migrate(&self, save: &mut T);
}

/// Rule built from a closure, for simple field rewrites.
pub struct FnMigrationRule<T> {
    id: MigrationId,
    apply: Box<dyn Fn(&mut T) + Send>,
}

impl<T> FnMigrationRule<T> {
    pub fn new(id: MigrationId, apply: impl Fn(&mut T) + Send + 'static) -> Self {
        Self {
            id,
            apply: Box::new(apply),
        }
    }
}

impl<T: Save> MigrationRule<T> for FnMigrationRule<T> {
    fn id(&self) -> MigrationId {
        self.id
    }

    fn migrate(&self, save: &mut T) {
        (self.apply)(save)
    }
}

/// The ordered migration rules for one save type.
///
/// Decides, for a freshly loaded save, which pending rules to apply and
/// reports how many executed so the caller can mark the save dirty.
pub struct MigrationChain<T: Save> {
    rules: Vec<Box<dyn MigrationRule<T>>>,
}

impl<T: Save> MigrationChain<T> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Fluent variant of [`MigrationChain::add_rule`].
    pub fn with_rule(mut self, rule: impl MigrationRule<T> + 'static) -> Self {
        self.add_rule(rule);
        self
    }

    /// Registers a rule, keeping the chain sorted ascending by id.
    /// A duplicate id is a configuration error: it is logged and the
    /// registration is dropped.
    pub fn add_rule(&mut self, rule: impl MigrationRule<T> + 'static) {
        if self.rules.iter().any(|r| r.id() == rule.id()) {
            log::error!(
                "Migration rule with id {} is already registered, dropping it",
                rule.id()
            );
            return;
        }
        self.rules.push(Box::new(rule));
        self.rules.sort_by_key(|r| r.id());
    }

    /// The migration id stamped on saves at write time: the highest rule
    /// id, or the sentinel for an empty chain.
    pub fn current_id(&self) -> MigrationId {
        self.rules
            .last()
            .map(|rule| rule.id())
            .unwrap_or(SENTINEL_MIGRATION_ID)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies pending rules to a freshly loaded payload, strictly in
    /// ascending id order. Returns the number of rules executed.
    ///
    /// A stored id that is neither the sentinel nor any registered rule
    /// id means the save was written under a rule this build does not
    /// know (version skew) and fails with [`SaveError::MigrationSkew`].
    pub(crate) fn apply(
        &self,
        name: &str,
        id: SaveId,
        stored: MigrationId,
        data: &mut T,
    ) -> Result<usize> {
        if self.rules.is_empty() {
            return Ok(0);
        }
        if let Some(last) = self.rules.last() {
            if last.matches(stored) {
                log::debug!("Save {} {} does not require migration", name, id);
                return Ok(0);
            }
        }

        // A sentinel id means the save predates every rule.
        let mut executing = stored == SENTINEL_MIGRATION_ID;
        if !executing && !self.rules.iter().any(|rule| rule.matches(stored)) {
            return Err(SaveError::MigrationSkew {
                name: name.to_string(),
                id,
                stored,
            });
        }

        let mut applied = 0;
        for rule in &self.rules {
            if !executing {
                if rule.matches(stored) {
                    executing = true;
                }
            } else {
                log::debug!("Migrating save {} {} to migration {}", name, id, rule.id());
                rule.migrate(data);
                applied += 1;
            }
        }
        Ok(applied)
    }
}

impl<T: Save> Default for MigrationChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Untyped view of a chain, used when stamping outgoing saves without
/// knowing their payload type.
pub(crate) trait MigrationStamp: Send {
    fn current_id(&self) -> MigrationId;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Save> MigrationStamp for MigrationChain<T> {
    fn current_id(&self) -> MigrationId {
        MigrationChain::current_id(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
