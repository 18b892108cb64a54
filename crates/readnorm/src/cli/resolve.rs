use std::path::Path;

use anyhow::{Context, Result};
use readnorm_core::classify::builtin as dialects;
use readnorm_core::profile::builtin;
use readnorm_core::{ClassifierConfig, DialectClassifier, ProfileRegistry};

pub fn classifier(path: &Path) -> Result<DialectClassifier> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading classifier config {}", path.display()))?;
    let config = ClassifierConfig::from_json_str(&text)
        .with_context(|| format!("parsing classifier config {}", path.display()))?;
    Ok(DialectClassifier::new(config)?)
}

/// Built-in profiles plus every profile in `dir`. A directory profile
/// sharing a built-in name must carry a higher version to take over its
/// dialect.
pub fn registry(dir: &Path, classifier: &DialectClassifier) -> Result<ProfileRegistry> {
    let registry = ProfileRegistry::builder()
        .profiles(builtin::profiles()?)
        .load_json_dir(dir)
        .with_context(|| format!("loading profiles from {}", dir.display()))?
        .dialect_families(classifier.families())
        .family_default(dialects::LIDC_FAMILY, "lidc_minimal")
        .build()?;
    Ok(registry)
}
