//! Profiles for the reading-session export family.
//!
//! These are ordinary [`Profile`] values; a JSON file describing the same
//! mappings would behave identically.

use super::{EntityRules, FieldMapping, Grouping, PositionRule, Profile, ProfileRegistry};
use crate::classify::builtin as dialects;
use crate::error::Result;
use crate::transform::Transform;
use crate::value::DataType;

/// Characteristic element name and canonical key, in rating-sheet order.
pub const CHARACTERISTICS: [(&str, &str); 9] = [
    ("subtlety", "subtlety"),
    ("internalStructure", "internal_structure"),
    ("calcification", "calcification"),
    ("sphericity", "sphericity"),
    ("margin", "margin"),
    ("lobulation", "lobulation"),
    ("spiculation", "spiculation"),
    ("texture", "texture"),
    ("malignancy", "malignancy"),
];

/// Characteristics every core-attribute reading carries.
const CORE_CHARACTERISTICS: [&str; 4] = ["subtlety", "sphericity", "margin", "malignancy"];

const ALL_CHARACTERISTICS: [&str; 9] = [
    "subtlety",
    "internal_structure",
    "calcification",
    "sphericity",
    "margin",
    "lobulation",
    "spiculation",
    "texture",
    "malignancy",
];

fn header_mappings() -> Result<Vec<FieldMapping>> {
    Ok(vec![
        FieldMapping::new("@uid", "metadata.message_uid", DataType::String)?,
        FieldMapping::new("ResponseHeader/Version", "metadata.version", DataType::String)?,
        FieldMapping::new("ResponseHeader/MessageId", "metadata.message_id", DataType::String)?,
        FieldMapping::new("ResponseHeader/DateRequest", "metadata.date_request", DataType::Date)?,
        FieldMapping::new("ResponseHeader/DateService", "metadata.date_service", DataType::Date)?,
        FieldMapping::new("ResponseHeader/TimeService", "metadata.time_service", DataType::String)?,
        FieldMapping::new(
            "ResponseHeader/SeriesInstanceUid",
            "metadata.series_instance_uid",
            DataType::String,
        )?
        .required(),
        FieldMapping::new(
            "ResponseHeader/StudyInstanceUID",
            "metadata.study_instance_uid",
            DataType::String,
        )?,
        FieldMapping::new("ResponseHeader/RequestingSite", "requesting_site", DataType::String)?,
        FieldMapping::new("ResponseHeader/ServicingSite", "servicing_site", DataType::String)?,
        FieldMapping::new("ResponseHeader/CtImageFile", "ct_image_file", DataType::String)?,
        FieldMapping::new(
            "ResponseHeader/TaskDescription",
            "task_description",
            DataType::String,
        )?
        .with_transform(Transform::CollapseWhitespace),
    ])
}

fn characteristic_mappings(required: &[&str]) -> Result<Vec<FieldMapping>> {
    CHARACTERISTICS
        .iter()
        .map(|&(source, target)| {
            let mapping = FieldMapping::new(source, target, DataType::Integer)?;
            Ok(if required.contains(&target) {
                mapping.required()
            } else {
                mapping
            })
        })
        .collect()
}

fn roi_mapping() -> Result<FieldMapping> {
    FieldMapping::array(
        "roi",
        "rois",
        vec![
            FieldMapping::new("imageZposition", "z", DataType::Float)?.required(),
            FieldMapping::new("imageSOP_UID", "sop_uid", DataType::String)?,
            FieldMapping::new("inclusion", "inclusion", DataType::Boolean)?,
            FieldMapping::array(
                "edgeMap",
                "edges",
                vec![
                    FieldMapping::new("xCoord", "x", DataType::Integer)?.required(),
                    FieldMapping::new("yCoord", "y", DataType::Integer)?.required(),
                ],
            )?,
        ],
    )
}

fn non_nodule_mapping() -> Result<FieldMapping> {
    FieldMapping::array(
        "nonNodule",
        "non_nodules",
        vec![
            FieldMapping::new("nonNoduleID", "id", DataType::String)?,
            FieldMapping::new("imageZposition", "z", DataType::Float)?,
            FieldMapping::new("locus/xCoord", "x", DataType::Integer)?,
            FieldMapping::new("locus/yCoord", "y", DataType::Integer)?,
        ],
    )
}

/// Builds one reading-session profile. `characteristics` is `None` for
/// dialects whose readings carry no characteristics block.
fn lidc_profile(
    name: &str,
    dialect: &str,
    characteristics: Option<&[&str]>,
    with_reason: bool,
) -> Result<Profile> {
    let mut reading = vec![
        FieldMapping::new("noduleID", "region_id", DataType::String)?.required(),
        roi_mapping()?,
    ];
    if let Some(required) = characteristics {
        reading.push(FieldMapping::object(
            "characteristics",
            "characteristics",
            characteristic_mappings(required)?,
        )?);
    }
    if with_reason {
        reading.push(
            FieldMapping::new("reason", "reason", DataType::String)?
                .with_transform(Transform::CollapseWhitespace),
        );
    }

    let session = FieldMapping::array(
        "readingSession",
        "sessions",
        vec![
            FieldMapping::new("annotationVersion", "annotation_version", DataType::String)?,
            FieldMapping::new("servicingRadiologistID", "annotator_id", DataType::String)?
                .required(),
            FieldMapping::array("unblindedReadNodule", "readings", reading)?,
            non_nodule_mapping()?,
        ],
    )?;

    let mut mappings = header_mappings()?;
    mappings.push(session);

    let mut rules = EntityRules::new("sessions", "readings");
    rules.annotator_key = Some("annotator_id".to_string());
    rules.grouping = Grouping::Proximity;
    rules.key_path = Some("region_id".to_string());
    rules.position = Some(PositionRule {
        x: "rois.edges.x".to_string(),
        y: "rois.edges.y".to_string(),
        z: Some("rois.z".to_string()),
    });
    rules.characteristics = characteristics
        .map(|_| {
            ALL_CHARACTERISTICS
                .iter()
                .map(|c| format!("characteristics.{c}"))
                .collect()
        })
        .unwrap_or_default();
    rules.cluster_id_prefix = "nodule-".to_string();

    let mut profile = Profile::new(name, dialect, mappings).with_entity_rules(rules);
    profile.validation.required_paths = vec!["metadata.series_instance_uid".to_string()];
    Ok(profile)
}

fn cxr_profile() -> Result<Profile> {
    let reading = vec![
        FieldMapping::new("noduleID", "region_id", DataType::String)?.required(),
        FieldMapping::new("roi/imageSOP_UID", "sop_uid", DataType::String)?,
        FieldMapping::array(
            "roi/edgeMap",
            "edges",
            vec![
                FieldMapping::new("xCoord", "x", DataType::Integer)?.required(),
                FieldMapping::new("yCoord", "y", DataType::Integer)?.required(),
            ],
        )?,
    ];
    let session = FieldMapping::array(
        "CXRreadingSession",
        "sessions",
        vec![
            FieldMapping::new("servicingRadiologistID", "annotator_id", DataType::String)?
                .required(),
            FieldMapping::array("unblindedRead", "readings", reading)?,
        ],
    )?;

    let mut mappings = header_mappings()?;
    mappings.push(session);

    let mut rules = EntityRules::new("sessions", "readings");
    rules.annotator_key = Some("annotator_id".to_string());
    rules.grouping = Grouping::KeyOrProximity;
    rules.key_path = Some("region_id".to_string());
    rules.position = Some(PositionRule {
        x: "edges.x".to_string(),
        y: "edges.y".to_string(),
        z: None,
    });
    rules.tolerance = 25.0;
    rules.cluster_id_prefix = "finding-".to_string();

    Ok(Profile::new("cxr_reading_session", dialects::CXR_READING_SESSION, mappings)
        .with_description("Chest radiograph reading sessions")
        .with_entity_rules(rules))
}

/// Every built-in profile, one per built-in dialect.
pub fn profiles() -> Result<Vec<Profile>> {
    Ok(vec![
        lidc_profile(
            "lidc_with_reason",
            dialects::LIDC_WITH_REASON,
            Some(&[]),
            true,
        )?
        .with_description("Reading sessions whose nodules carry a free-text reason"),
        lidc_profile(
            "lidc_complete",
            dialects::LIDC_COMPLETE_ATTRIBUTES,
            Some(&ALL_CHARACTERISTICS),
            false,
        )?
        .with_description("All nine nodule characteristics rated"),
        lidc_profile(
            "lidc_core",
            dialects::LIDC_CORE_ATTRIBUTES,
            Some(&CORE_CHARACTERISTICS),
            false,
        )?
        .with_description("Core nodule characteristics rated"),
        lidc_profile(
            "lidc_minimal",
            dialects::LIDC_MINIMAL_ATTRIBUTES,
            Some(&[]),
            false,
        )?
        .with_description("One to three nodule characteristics rated"),
        lidc_profile(
            "lidc_no_characteristics",
            dialects::LIDC_NO_CHARACTERISTICS,
            None,
            false,
        )?
        .with_description("Nodule outlines without characteristic ratings"),
        cxr_profile()?,
    ])
}

/// Registry holding the built-in profiles, with dialect families taken from
/// the built-in signatures and `lidc_minimal` as the reading-session
/// fallback.
pub fn registry() -> Result<ProfileRegistry> {
    let signatures = dialects::signatures();
    ProfileRegistry::builder()
        .profiles(profiles()?)
        .dialect_families(
            signatures
                .iter()
                .filter_map(|s| s.family.as_deref().map(|f| (s.name.as_str(), f))),
        )
        .family_default(dialects::LIDC_FAMILY, "lidc_minimal")
        .build()
}
