//! Course file parsing.
//!
//! A course file lists the deliverables that can be graded, the staff
//! accounts that bypass the feedback quota, and the deliverable pushes are
//! graded against by default.

use crate::{ConfigError, ConfigResult};
use async_trait::async_trait;
use autotest_core::portal::{ClassPortal, DeliverableConfig};
use kdl::{KdlDocument, KdlNode};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Default seconds between feedback grants when a deliverable omits it.
const DEFAULT_STUDENT_DELAY: u64 = 12 * 60 * 60;
/// Default container run time when a deliverable omits it.
const DEFAULT_MAX_EXEC_TIME: u64 = 5 * 60;

/// Parsed course file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseConfig {
    pub name: String,
    pub default_deliverable: Option<String>,
    /// Lower-cased GitHub logins.
    pub staff: BTreeSet<String>,
    pub deliverables: BTreeMap<String, DeliverableConfig>,
}

impl CourseConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_course(&content)
    }
}

/// Parse a course configuration from KDL text.
pub fn parse_course(kdl: &str) -> ConfigResult<CourseConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut course = CourseConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "course" => {
                course.name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("course name".to_string()))?;
            }
            "default-deliverable" => {
                course.default_deliverable = get_first_string_arg(node);
            }
            "staff" => {
                course
                    .staff
                    .extend(get_all_string_args(node).iter().map(|s| s.to_lowercase()));
            }
            "deliverable" => {
                let (id, config) = parse_deliverable(node)?;
                if course.deliverables.insert(id.clone(), config).is_some() {
                    return Err(ConfigError::Duplicate(format!("deliverable '{}'", id)));
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if course.name.is_empty() {
        return Err(ConfigError::MissingField("course name".to_string()));
    }

    if let Some(ref default) = course.default_deliverable {
        if !course.deliverables.contains_key(default) {
            return Err(ConfigError::InvalidReference(format!(
                "default deliverable '{}' is not defined",
                default
            )));
        }
    }

    Ok(course)
}

fn parse_deliverable(node: &KdlNode) -> ConfigResult<(String, DeliverableConfig)> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("deliverable id".to_string()))?;

    let mut image = String::new();
    let mut student_delay = DEFAULT_STUDENT_DELAY;
    let mut max_exec_time = DEFAULT_MAX_EXEC_TIME;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    image = get_first_string_arg(child).unwrap_or_default();
                }
                "student-delay" => {
                    student_delay = get_seconds_arg(child, "student-delay")?;
                }
                "max-exec-time" => {
                    max_exec_time = get_seconds_arg(child, "max-exec-time")?;
                }
                _ => {}
            }
        }
    }

    if image.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "image for deliverable '{}'",
            id
        )));
    }

    if max_exec_time == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max-exec-time".to_string(),
            message: format!("deliverable '{}' must allow at least one second", id),
        });
    }

    Ok((
        id,
        DeliverableConfig {
            image,
            student_delay,
            max_exec_time,
        },
    ))
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_seconds_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is not a valid number of seconds", value),
    })
}

/// Class portal answering from a course file.
#[derive(Debug, Clone)]
pub struct CoursePortal {
    course: CourseConfig,
}

impl CoursePortal {
    pub fn new(course: CourseConfig) -> Self {
        Self { course }
    }

    pub fn course(&self) -> &CourseConfig {
        &self.course
    }
}

#[async_trait]
impl ClassPortal for CoursePortal {
    async fn is_staff(&self, person_id: &str) -> autotest_core::Result<bool> {
        Ok(self.course.staff.contains(&person_id.to_lowercase()))
    }

    async fn default_deliverable(&self) -> autotest_core::Result<Option<String>> {
        Ok(self.course.default_deliverable.clone())
    }

    async fn container_details(
        &self,
        deliv_id: &str,
    ) -> autotest_core::Result<Option<DeliverableConfig>> {
        Ok(self.course.deliverables.get(deliv_id).cloned())
    }
}
