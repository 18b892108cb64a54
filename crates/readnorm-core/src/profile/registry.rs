use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::Profile;
use crate::error::{Error, Result};

/// Maps a classified dialect to the profile that normalizes it.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self, dialect: &str) -> Result<Arc<Profile>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileFile {
    Many(Vec<Profile>),
    One(Box<Profile>),
}

/// Collects profiles and fallback rules, then freezes them into a
/// [`ProfileRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    profiles: Vec<Profile>,
    dialect_families: BTreeMap<String, String>,
    family_defaults: BTreeMap<String, String>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profiles.push(profile);
        self
    }

    #[must_use]
    pub fn profiles(mut self, profiles: impl IntoIterator<Item = Profile>) -> Self {
        self.profiles.extend(profiles);
        self
    }

    /// Declares which broad document family a dialect belongs to.
    #[must_use]
    pub fn dialect_family(mut self, dialect: &str, family: &str) -> Self {
        self.dialect_families
            .insert(dialect.to_string(), family.to_string());
        self
    }

    #[must_use]
    pub fn dialect_families<'a>(
        mut self,
        families: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        for (dialect, family) in families {
            self.dialect_families
                .insert(dialect.to_string(), family.to_string());
        }
        self
    }

    /// Names the profile used for dialects of `family` that have no profile
    /// of their own. Without this no fallback happens.
    #[must_use]
    pub fn family_default(mut self, family: &str, profile: &str) -> Self {
        self.family_defaults
            .insert(family.to_string(), profile.to_string());
        self
    }

    pub fn load_json_str(mut self, text: &str) -> Result<Self> {
        match serde_json::from_str::<ProfileFile>(text)? {
            ProfileFile::One(profile) => self.profiles.push(*profile),
            ProfileFile::Many(profiles) => self.profiles.extend(profiles),
        }
        Ok(self)
    }

    /// Loads every `*.json` file in `dir`, in file name order.
    pub fn load_json_dir(mut self, dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("json"));
            if path.is_file() && is_json {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            debug!(path = %path.display(), "Loading profile file");
            let text = std::fs::read_to_string(&path)?;
            self = self.load_json_str(&text)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Result<ProfileRegistry> {
        let mut versions: BTreeMap<String, BTreeMap<u32, Arc<Profile>>> = BTreeMap::new();
        for profile in self.profiles {
            profile.validate()?;
            let slot = versions.entry(profile.name.clone()).or_default();
            if slot.contains_key(&profile.version) {
                return Err(Error::invalid_profile(
                    &profile.name,
                    format!("version {} registered twice", profile.version),
                ));
            }
            slot.insert(profile.version, Arc::new(profile));
        }

        let mut by_dialect: BTreeMap<String, Arc<Profile>> = BTreeMap::new();
        for latest in versions.values().filter_map(|v| v.values().next_back()) {
            if let Some(existing) = by_dialect.get(&latest.dialect) {
                return Err(Error::invalid_profile(
                    &latest.name,
                    format!(
                        "dialect '{}' is already served by '{}'",
                        latest.dialect, existing.name
                    ),
                ));
            }
            by_dialect.insert(latest.dialect.clone(), Arc::clone(latest));
        }

        let mut defaults: BTreeMap<String, Arc<Profile>> = BTreeMap::new();
        for (family, name) in &self.family_defaults {
            let profile = versions
                .get(name)
                .and_then(|v| v.values().next_back())
                .ok_or_else(|| {
                    Error::invalid_profile(
                        name,
                        format!("default for family '{family}' is not registered"),
                    )
                })?;
            defaults.insert(family.clone(), Arc::clone(profile));
        }

        for (dialect, family) in &self.dialect_families {
            if by_dialect.contains_key(dialect) {
                continue;
            }
            if let Some(profile) = defaults.get(family) {
                debug!(%dialect, %family, profile = %profile.name, "Dialect falls back to family default");
                by_dialect.insert(dialect.clone(), Arc::clone(profile));
            }
        }

        debug!(
            profiles = versions.len(),
            dialects = by_dialect.len(),
            "Profile registry built"
        );
        Ok(ProfileRegistry {
            versions,
            by_dialect,
        })
    }
}

/// Immutable, versioned profile store. The dialect table is computed once
/// at construction; lookups never allocate or mutate.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    versions: BTreeMap<String, BTreeMap<u32, Arc<Profile>>>,
    by_dialect: BTreeMap<String, Arc<Profile>>,
}

impl ProfileRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn from_json_dir(dir: &Path) -> Result<Self> {
        RegistryBuilder::new().load_json_dir(dir)?.build()
    }

    /// Latest version of the named profile.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Profile>> {
        self.versions
            .get(name)
            .and_then(|v| v.values().next_back())
            .cloned()
    }

    #[must_use]
    pub fn get_version(&self, name: &str, version: u32) -> Option<Arc<Profile>> {
        self.versions.get(name).and_then(|v| v.get(&version)).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// The newest version of every registered profile, by name.
    pub fn latest(&self) -> impl Iterator<Item = &Profile> {
        self.versions
            .values()
            .filter_map(|v| v.values().next_back())
            .map(AsRef::as_ref)
    }

    pub fn dialects(&self) -> impl Iterator<Item = &str> {
        self.by_dialect.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl ProfileResolver for ProfileRegistry {
    fn resolve(&self, dialect: &str) -> Result<Arc<Profile>> {
        self.by_dialect
            .get(dialect)
            .cloned()
            .ok_or_else(|| Error::NoProfileForDialect(dialect.to_string()))
    }
}
