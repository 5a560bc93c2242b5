//! Pipeline and task labels.
//!
//! A pipeline label is `<base>-<shortid>j` where `<base>` is the user-chosen
//! pipeline name. Child labels are `<pipeline>--<task>`, so `j--` appears in
//! child labels and nowhere else, which lets a bare label be classified
//! without a round trip to the job store.

use std::sync::LazyLock;

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;

/// Separator between a pipeline label and a local task name.
pub const CHILD_SEPARATOR: &str = "--";

/// Marker substring present in every child label.
pub const CHILD_MARKER: &str = "j--";

const SHORT_ID_LEN: usize = 10;

static K8S_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9\-.]+$").unwrap());

/// Check a pipeline name against the Kubernetes DNS-name convention
/// (lower case alphanumerics, `-`, and `.`).
pub fn validate_pipeline_name(name: &str) -> bool {
    K8S_NAME.is_match(name)
}

/// Generate a unique pipeline label from the user-chosen base name.
///
/// The trailing `j` disambiguates parent labels from child labels: only a
/// child label ever contains `j--`.
pub fn generate_pipeline_label(base: &str) -> String {
    let short_id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_ID_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{base}-{short_id}j")
}

/// Child labels are canonical, keyed off the unique id of the parent.
pub fn child_label(pipeline: &str, task: &str) -> String {
    format!("{pipeline}{CHILD_SEPARATOR}{task}")
}

/// A record is a child iff its label carries the `j--` marker.
pub fn is_child_label(label: &str) -> bool {
    label.contains(CHILD_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_pipeline_names() {
        assert!(validate_pipeline_name("bert-base"));
        assert!(validate_pipeline_name("sst2.v1"));
        assert!(validate_pipeline_name("a"));
    }

    #[test]
    fn invalid_pipeline_names() {
        assert!(!validate_pipeline_name("Bert"));
        assert!(!validate_pipeline_name("my_pipeline"));
        assert!(!validate_pipeline_name("name with space"));
        assert!(!validate_pipeline_name(""));
    }

    #[test]
    fn generated_labels_are_children_free() {
        let label = generate_pipeline_label("sst2");
        assert!(label.starts_with("sst2-"));
        assert!(label.ends_with('j'));
        assert!(!is_child_label(&label));
    }

    #[test]
    fn child_labels_are_detected() {
        let parent = generate_pipeline_label("sst2");
        let child = child_label(&parent, "train");
        assert!(is_child_label(&child));
        assert_eq!(child, format!("{parent}--train"));
    }
}
