use std::sync::Once;

use crate::catalog::Catalog;
use crate::model::{AnswerRecord, When};

static INIT: Once = Once::new();

/// Initialize test logging once per test binary.
///
/// `RUST_LOG` controls the filter; output goes through the test writer so
/// it only shows for failing tests.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn builtin_catalog() -> Catalog {
    Catalog::builtin().expect("builtin catalog is valid")
}

/// A finished math-lesson record.
pub fn math_record() -> AnswerRecord {
    AnswerRecord {
        when: Some(When::Today),
        subject: Some("さんすう".to_string()),
        detail: Some("たしざん".to_string()),
        feeling: Some("できた".to_string()),
        ..Default::default()
    }
}
