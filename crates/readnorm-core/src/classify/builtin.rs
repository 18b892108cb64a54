//! Dialects of the reading-session export family.

use super::{Check, ClassifierConfig, DialectClassifier, DialectSignature, SignalConfig};
use crate::error::Result;

pub const LIDC_FAMILY: &str = "lidc";
pub const CXR_FAMILY: &str = "cxr";

pub const LIDC_WITH_REASON: &str = "lidc_with_reason";
pub const LIDC_COMPLETE_ATTRIBUTES: &str = "lidc_complete_attributes";
pub const LIDC_CORE_ATTRIBUTES: &str = "lidc_core_attributes";
pub const LIDC_MINIMAL_ATTRIBUTES: &str = "lidc_minimal_attributes";
pub const LIDC_NO_CHARACTERISTICS: &str = "lidc_no_characteristics";
pub const CXR_READING_SESSION: &str = "cxr_reading_session";

const LIDC_ROOT: &str = "LidcReadMessage";
const CXR_ROOT: &str = "IdriReadMessage";

fn lidc(name: &str, priority: i32, mut checks: Vec<Check>) -> DialectSignature {
    checks.insert(
        0,
        Check::RootIs {
            name: LIDC_ROOT.to_string(),
        },
    );
    DialectSignature::new(name, priority, checks).with_family(LIDC_FAMILY)
}

#[must_use]
pub fn signatures() -> Vec<DialectSignature> {
    vec![
        lidc(
            LIDC_WITH_REASON,
            50,
            vec![Check::ElementPresent {
                element: "reason".to_string(),
            }],
        ),
        lidc(
            LIDC_COMPLETE_ATTRIBUTES,
            40,
            vec![Check::MinAttributeCount { count: 9 }],
        ),
        lidc(
            LIDC_CORE_ATTRIBUTES,
            30,
            vec![
                Check::MinAttributeCount { count: 4 },
                Check::MaxAttributeCount { count: 8 },
            ],
        ),
        lidc(
            LIDC_MINIMAL_ATTRIBUTES,
            20,
            vec![
                Check::MinAttributeCount { count: 1 },
                Check::MaxAttributeCount { count: 3 },
            ],
        ),
        lidc(
            LIDC_NO_CHARACTERISTICS,
            10,
            vec![Check::MaxAttributeCount { count: 0 }],
        ),
        DialectSignature::new(
            CXR_READING_SESSION,
            40,
            vec![
                Check::RootIs {
                    name: CXR_ROOT.to_string(),
                },
                Check::ElementPresent {
                    element: "CXRreadingSession".to_string(),
                },
            ],
        )
        .with_family(CXR_FAMILY),
    ]
}

#[must_use]
pub fn config() -> ClassifierConfig {
    ClassifierConfig {
        signals: SignalConfig::default(),
        signatures: signatures(),
    }
}

pub fn classifier() -> Result<DialectClassifier> {
    DialectClassifier::new(config())
}
