use std::collections::BTreeMap;
use std::sync::Arc;

use ledger_events::canonical::canonical_hash;

use crate::errors::RuleCatalogError;
use crate::handler::validate_rules;
use crate::models::{Activation, Rule, RuleSetVersion};

/// Versioned registry of rule sets plus the history of which version was
/// active when. Published versions are never edited.
#[derive(Debug, Default, Clone)]
pub struct RuleCatalog {
    versions: BTreeMap<u64, Arc<RuleSetVersion>>,
    activations: Vec<Activation>,
}

pub fn rules_hash(rules: &[Rule]) -> Result<String, RuleCatalogError> {
    canonical_hash(&rules).map_err(RuleCatalogError::Serialization)
}

impl RuleCatalog {
    /// Publishes `rules` as the next version. Publishing content identical to
    /// the latest version returns that version instead (`false`).
    pub fn publish(
        &mut self,
        mut rules: Vec<Rule>,
        description: Option<String>,
        now: i64,
    ) -> Result<(Arc<RuleSetVersion>, bool), RuleCatalogError> {
        validate_rules(&rules)?;
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        let content_hash = rules_hash(&rules)?;

        if let Some(latest) = self.versions.values().next_back()
            && latest.content_hash == content_hash
        {
            return Ok((latest.clone(), false));
        }

        let version = Arc::new(RuleSetVersion {
            version: self.latest_version() + 1,
            rules,
            content_hash,
            description,
            created_at: now,
        });
        self.versions.insert(version.version, version.clone());
        Ok((version, true))
    }

    /// Loads a version published elsewhere (durable storage, another replica).
    pub fn insert(&mut self, version: RuleSetVersion) -> Result<(), RuleCatalogError> {
        if let Some(existing) = self.versions.get(&version.version) {
            if existing.content_hash != version.content_hash {
                return Err(RuleCatalogError::VersionConflict(version.version));
            }
            return Ok(());
        }
        validate_rules(&version.rules)?;
        self.versions.insert(version.version, Arc::new(version));
        Ok(())
    }

    pub fn activate(&mut self, version: u64, now: i64) -> Result<Activation, RuleCatalogError> {
        if !self.versions.contains_key(&version) {
            return Err(RuleCatalogError::VersionNotFound(version));
        }
        if let Some(current) = self.current_activation()
            && current.version == version
        {
            return Ok(current.clone());
        }
        if let Some(current) = self
            .activations
            .iter_mut()
            .rev()
            .find(|a| a.deactivated_at.is_none())
        {
            current.deactivated_at = Some(now);
        }
        let activation = Activation {
            version,
            activated_at: now,
            deactivated_at: None,
        };
        self.activations.push(activation.clone());
        Ok(activation)
    }

    /// Replaces the activation history with activations read back from an
    /// append-only log, in any order. Each activation ends where the next
    /// one starts.
    pub fn restore_activations(&mut self, mut activations: Vec<Activation>) {
        activations.sort_by_key(|a| (a.activated_at, a.version));
        for i in 0..activations.len() {
            let next_start = activations.get(i + 1).map(|a| a.activated_at);
            activations[i].deactivated_at = next_start;
        }
        self.activations = activations;
    }

    pub fn active(&self) -> Result<Arc<RuleSetVersion>, RuleCatalogError> {
        let current = self
            .current_activation()
            .ok_or(RuleCatalogError::NoActiveVersion)?;
        self.get(current.version)
    }

    pub fn active_at(&self, timestamp: i64) -> Result<Arc<RuleSetVersion>, RuleCatalogError> {
        let activation = self
            .activations
            .iter()
            .rev()
            .find(|a| {
                a.activated_at <= timestamp && a.deactivated_at.is_none_or(|d| timestamp < d)
            })
            .ok_or(RuleCatalogError::NoActiveVersion)?;
        self.get(activation.version)
    }

    pub fn get(&self, version: u64) -> Result<Arc<RuleSetVersion>, RuleCatalogError> {
        self.versions
            .get(&version)
            .cloned()
            .ok_or(RuleCatalogError::VersionNotFound(version))
    }

    pub fn latest_version(&self) -> u64 {
        self.versions.keys().next_back().copied().unwrap_or(0)
    }

    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    fn current_activation(&self) -> Option<&Activation> {
        self.activations
            .iter()
            .rev()
            .find(|a| a.deactivated_at.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleKind, Severity};

    fn rule(id: &str, types: &[&str]) -> Rule {
        Rule {
            rule_id: id.to_string(),
            version: 1,
            description: format!("{id} description"),
            severity: Severity::Blocking,
            predicate: RuleKind::RequiredAttachmentTypes {
                types: types.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    #[test]
    fn versions_increase_monotonically() {
        let mut catalog = RuleCatalog::default();
        let (v1, created) = catalog.publish(vec![rule("R-1", &["a"])], None, 10).unwrap();
        assert!(created);
        let (v2, _) = catalog.publish(vec![rule("R-1", &["b"])], None, 20).unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(catalog.latest_version(), 2);
    }

    #[test]
    fn republishing_same_content_is_idempotent() {
        let mut catalog = RuleCatalog::default();
        let (v1, _) = catalog
            .publish(vec![rule("R-2", &["a"]), rule("R-1", &["b"])], None, 10)
            .unwrap();
        let (again, created) = catalog
            .publish(vec![rule("R-1", &["b"]), rule("R-2", &["a"])], None, 20)
            .unwrap();
        assert!(!created);
        assert_eq!(again.version, v1.version);
        assert_eq!(v1.rules[0].rule_id, "R-1");
    }

    #[test]
    fn activation_history_answers_point_in_time_queries() {
        let mut catalog = RuleCatalog::default();
        catalog.publish(vec![rule("R-1", &["a"])], None, 0).unwrap();
        catalog.publish(vec![rule("R-1", &["b"])], None, 0).unwrap();
        assert_eq!(catalog.active(), Err(RuleCatalogError::NoActiveVersion));

        catalog.activate(1, 100).unwrap();
        catalog.activate(2, 200).unwrap();
        assert_eq!(catalog.active().unwrap().version, 2);
        assert_eq!(catalog.active_at(150).unwrap().version, 1);
        assert_eq!(catalog.active_at(250).unwrap().version, 2);
        assert!(catalog.active_at(50).is_err());
        assert_eq!(catalog.activations().len(), 2);
        assert_eq!(catalog.activations()[0].deactivated_at, Some(200));
    }

    #[test]
    fn restored_log_rebuilds_deactivations_from_interleaved_writers() {
        let mut catalog = RuleCatalog::default();
        catalog.publish(vec![rule("R-1", &["a"])], None, 0).unwrap();
        catalog.publish(vec![rule("R-1", &["b"])], None, 0).unwrap();
        let logged = |version, activated_at| Activation {
            version,
            activated_at,
            deactivated_at: None,
        };

        catalog.restore_activations(vec![logged(2, 300), logged(1, 100), logged(2, 200)]);
        let history = catalog.activations();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].deactivated_at, Some(200));
        assert_eq!(history[1].deactivated_at, Some(300));
        assert_eq!(history[2].deactivated_at, None);
        assert_eq!(catalog.active().unwrap().version, 2);
        assert_eq!(catalog.active_at(150).unwrap().version, 1);
    }

    #[test]
    fn activating_unknown_version_fails() {
        let mut catalog = RuleCatalog::default();
        assert_eq!(
            catalog.activate(7, 0),
            Err(RuleCatalogError::VersionNotFound(7))
        );
    }

    #[test]
    fn insert_rejects_divergent_content() {
        let mut catalog = RuleCatalog::default();
        let (v1, _) = catalog.publish(vec![rule("R-1", &["a"])], None, 0).unwrap();
        let mut forged = (*v1).clone();
        forged.content_hash = "other".to_string();
        assert_eq!(
            catalog.insert(forged),
            Err(RuleCatalogError::VersionConflict(1))
        );
        assert!(catalog.insert((*v1).clone()).is_ok());
    }
}
