//! # Reportwatch Report
//!
//! Reading test-report folders: case documents are normalized into
//! [`TestCase`](reportwatch_model::TestCase), flattened
//! [`TestStep`](reportwatch_model::TestStep)s and
//! [`Attachment`](reportwatch_model::Attachment)s, and whole targets are
//! aggregated into result counts and ranked root-cause tables.
//!
//! Report documents are loosely shaped JSON. Every field lookup goes through
//! an explicit priority list of aliases, and nested structures are walked with
//! an explicit stack so adversarially deep documents are safe to read.
//!
//! ```no_run
//! use reportwatch_report::{aggregate_path, parse_run_folder};
//! use std::path::Path;
//!
//! let folder = Path::new("/reports/web/2024-05-01");
//! let report = parse_run_folder(folder, "2024-05-01");
//! println!("{} cases, {} skipped", report.cases.len(), report.failures.len());
//!
//! let aggregate = aggregate_path(Path::new("/reports/web"));
//! println!("total={}", aggregate.counts.total);
//! ```

mod aggregate;
mod error;
mod fields;
mod parser;
mod run;
mod scanner;
mod tree;

pub use aggregate::{
    aggregate_path, count_results, CauseTally, TargetAggregate, EXAMPLES_PER_CAUSE,
    MESSAGE_CAUSE_CHARS, TOP_CAUSES,
};
pub use error::{DocumentFailure, ReportError, Result};
pub use fields::Object;
pub use parser::{
    build_curl, case_duration, extract_request, extract_response, mask_headers,
    normalize_identifier, parse_case_document, parse_header_lines, parse_run_folder,
    test_case_id, FolderReport, ParseOutcome, ParsedCase,
};
pub use run::{
    build_test_run, folder_start_time, parse_summary_text, read_summary_file, SummaryText,
    START_TIME_FORMAT, SUMMARY_FILE_NAME,
};
pub use scanner::{is_control_file, read_json_file, ReportScanner, CONTROL_FILE_NAMES};
pub use tree::{flatten_preorder, for_each_object};
