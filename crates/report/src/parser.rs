//! Normalizes one report document into a test case, its flattened steps and
//! its attachments.

use crate::fields::{
    first_object, first_present, first_str, non_null, number_as_i64, object_items, scalar_text,
    truthy, Object,
};
use crate::scanner::{read_json_file, ReportScanner};
use crate::tree::flatten_preorder;
use crate::DocumentFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use reportwatch_model::{
    Attachment, StepRequest, StepResponse, TestCase, TestStep, HEADER_MASK,
};
use serde_json::Value;
use std::path::Path;

static NON_WORD_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("static regex"));
static UNDERSCORE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("static regex"));
static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z\-]*)\s*[:=]\s*(.+)$").expect("static regex")
});

const STEP_LIST_KEYS: [&str; 2] = ["steps", "testSteps"];
const CHILD_STEP_KEYS: [&str; 3] = ["children", "steps", "testSteps"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCase {
    pub case: TestCase,
    pub steps: Vec<TestStep>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Case(Box<ParsedCase>),
    /// Not a case document: not an object, or no `name`/`title`.
    Ignored,
}

/// Everything recognized in one run folder. Unreadable documents are listed in
/// `failures` and do not stop the rest of the folder.
#[derive(Debug, Default)]
pub struct FolderReport {
    pub cases: Vec<ParsedCase>,
    pub ignored: usize,
    pub failures: Vec<DocumentFailure>,
}

/// Lowercased identifier with every non-word run collapsed to one underscore
/// and surrounding underscores trimmed. `None` when nothing usable remains.
#[must_use]
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let replaced = NON_WORD_RUN.replace_all(raw, "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// Stable case id: normalized filename stem, else normalized document name,
/// else the raw stem.
#[must_use]
pub fn test_case_id(file_stem: &str, name: Option<&str>) -> String {
    normalize_identifier(file_stem)
        .or_else(|| name.and_then(normalize_identifier))
        .unwrap_or_else(|| file_stem.to_string())
}

/// Copy of a header mapping with any `Authorization` value masked.
/// Non-mapping input yields `None`.
#[must_use]
pub fn mask_headers(headers: &Value) -> Option<Object> {
    let map = headers.as_object()?;
    Some(
        map.iter()
            .map(|(key, value)| {
                if key.eq_ignore_ascii_case("authorization") {
                    (key.clone(), Value::String(HEADER_MASK.to_string()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect(),
    )
}

/// `key: value` / `key=value` lines of a raw header block; other lines are skipped.
#[must_use]
pub fn parse_header_lines(raw: &str) -> Vec<(String, String)> {
    let cleaned = raw.replace(['`', '\r'], "");
    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let caps = HEADER_LINE.captures(line)?;
            Some((caps[1].trim().to_string(), caps[2].trim().to_string()))
        })
        .collect()
}

/// Equivalent `curl` invocation. `None` when there is no URL to call.
#[must_use]
pub fn build_curl(
    url: Option<&str>,
    content_type: Option<&str>,
    headers: &[(String, String)],
    content: Option<&str>,
) -> Option<String> {
    let url = url?;
    let mut parts = Vec::with_capacity(headers.len() + 1);
    if let Some(ctype) = content_type.filter(|c| !c.is_empty()) {
        parts.push(format!("--header 'Content-Type: {ctype}'"));
    }
    parts.extend(
        headers
            .iter()
            .map(|(key, value)| format!("--header '{key}: {value}'")),
    );

    let mut command = format!("curl --location --globoff '{url}'");
    if !parts.is_empty() {
        command.push_str(" \\\n");
        command.push_str(&parts.join(" \\\n"));
    }
    if let Some(body) = content.filter(|c| !c.is_empty()) {
        command.push_str(&format!(" \\\n--data '{body}'"));
    }
    Some(command)
}

/// Request details of a step (`restQuery`, else `request`).
#[must_use]
pub fn extract_request(step: &Object) -> Option<StepRequest> {
    let raw = first_object(step, &["restQuery", "request"])?;

    let url = first_str(raw, &["path", "url"]).map(|u| u.replace('`', "").trim().to_string());
    let content_type = raw.get("contentType").and_then(Value::as_str);
    let content = non_null(raw, "content");
    let request_headers = non_null(raw, "requestHeaders");
    let header_lines = request_headers
        .and_then(Value::as_str)
        .map(parse_header_lines)
        .unwrap_or_default();

    let headers = match raw.get("headers").and_then(mask_headers) {
        Some(masked) => Some(masked),
        None if !header_lines.is_empty() => {
            let mapping: Object = header_lines
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            mask_headers(&Value::Object(mapping))
        }
        None => None,
    };

    let curl = build_curl(
        url.as_deref(),
        content_type,
        &header_lines,
        content.and_then(Value::as_str),
    );

    Some(StepRequest {
        method: raw.get("method").and_then(scalar_text),
        url,
        content: content.cloned(),
        content_type: content_type.map(str::to_string),
        headers,
        request_headers: request_headers.cloned(),
        response_body: non_null(raw, "responseBody").cloned(),
        status_code: non_null(raw, "statusCode").cloned(),
        curl,
    })
}

/// Response details of a step (`restResponse`, else `response`).
#[must_use]
pub fn extract_response(step: &Object) -> Option<StepResponse> {
    let raw = first_object(step, &["restResponse", "response"])?;
    Some(StepResponse {
        status: first_present(raw, &["status", "statusCode"]).cloned(),
        body: non_null(raw, "body").cloned(),
    })
}

/// Raw elements of the immediate step lists (`steps` then `testSteps`).
fn immediate_step_values(obj: &Object) -> Vec<&Value> {
    STEP_LIST_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_array))
        .flatten()
        .collect()
}

fn child_steps(step: &Object) -> Vec<&Object> {
    first_present(step, &CHILD_STEP_KEYS)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

/// Depth-first pre-order flattening of a case's step tree.
#[must_use]
pub fn flatten_steps(doc: &Object) -> Vec<&Object> {
    let top: Vec<&Object> = immediate_step_values(doc)
        .into_iter()
        .filter_map(Value::as_object)
        .collect();
    flatten_preorder(&top, child_steps)
}

/// Explicit `duration`, else the sum of the immediate steps' durations.
/// Nested steps are not summed. The sum saturates at the `i64` bounds.
#[must_use]
pub fn case_duration(doc: &Object) -> i64 {
    if let Some(explicit) = doc.get("duration").and_then(number_as_i64) {
        return explicit;
    }
    immediate_step_values(doc)
        .into_iter()
        .filter_map(Value::as_object)
        .filter_map(|step| step.get("duration").and_then(number_as_i64))
        .fold(0i64, i64::saturating_add)
}

struct Labels {
    feature: Option<String>,
    story: Option<String>,
    tags: Vec<String>,
}

fn resolve_labels(doc: &Object) -> Labels {
    let mut feature = first_str(doc, &["feature"]).map(str::to_string);
    let mut story: Option<String> = None;
    let mut tags = Vec::new();

    for tag in object_items(doc, "tags") {
        let name = first_present(tag, &["name", "tag"]).and_then(scalar_text);
        let kind = first_str(tag, &["type", "tagType"]).map(str::to_ascii_lowercase);
        if let Some(kind) = kind.as_deref() {
            if (kind == "feature" || kind == "story") && feature.is_none() {
                feature = name.clone();
            }
            if kind == "story" && story.is_none() {
                story = name.clone();
            }
        }
        if let Some(name) = name {
            tags.push(name);
        }
    }

    if let Some(user_story) = doc.get("userStory").and_then(Value::as_object) {
        if story.is_none() {
            story = first_str(user_story, &["storyName", "name"]).map(str::to_string);
        }
        if feature.is_none() {
            feature = first_str(user_story, &["path"]).map(str::to_string);
        }
    }

    Labels {
        feature,
        story,
        tags,
    }
}

fn error_message(doc: &Object) -> Option<String> {
    match doc.get("testFailureCause")? {
        Value::Object(cause) => first_str(cause, &["message", "errorType"]).map(str::to_string),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

fn attachments(run_id: &str, test_case_id: &str, doc: &Object) -> Vec<Attachment> {
    object_items(doc, "attachments")
        .chain(object_items(doc, "screenshots"))
        .map(|item| Attachment {
            run_id: run_id.to_string(),
            test_case_id: test_case_id.to_string(),
            name: first_str(item, &["name", "title"]).map(str::to_string),
            kind: first_str(item, &["type", "format"]).map(str::to_string),
            path: first_str(item, &["path", "source"]).map(str::to_string),
        })
        .collect()
}

fn step_record(run_id: &str, test_case_id: &str, order: u32, step: &Object) -> TestStep {
    TestStep {
        run_id: run_id.to_string(),
        test_case_id: test_case_id.to_string(),
        step_order: order,
        name: first_str(step, &["description", "name"]).map(str::to_string),
        status: step.get("result").and_then(scalar_text),
        duration: step.get("duration").and_then(Value::as_number).cloned(),
        request: extract_request(step),
        response: extract_response(step),
        error: non_null(step, "error").cloned(),
    }
}

/// Parses one report document found as `file_name` inside run `run_id`.
#[must_use]
pub fn parse_case_document(run_id: &str, file_name: &str, doc: &Value) -> ParseOutcome {
    let Some(obj) = doc.as_object() else {
        return ParseOutcome::Ignored;
    };
    let Some(name) = first_str(obj, &["name", "title"]) else {
        return ParseOutcome::Ignored;
    };

    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let test_case_id = test_case_id(&stem, Some(name));
    let labels = resolve_labels(obj);

    let steps: Vec<TestStep> = flatten_steps(obj)
        .into_iter()
        .zip(1u32..)
        .map(|(step, order)| step_record(run_id, &test_case_id, order, step))
        .collect();

    let case = TestCase {
        run_id: run_id.to_string(),
        test_case_id: test_case_id.clone(),
        name: Some(name.to_string()),
        feature: labels.feature,
        story: labels.story,
        tags: labels.tags,
        status: obj
            .get("result")
            .filter(|v| truthy(v))
            .and_then(scalar_text)
            .map(|s| s.to_uppercase()),
        duration: case_duration(obj),
        error_message: error_message(obj),
        has_steps: !immediate_step_values(obj).is_empty(),
        has_attachment: ["attachments", "screenshots"]
            .iter()
            .any(|key| obj.get(*key).is_some_and(truthy)),
    };

    ParseOutcome::Case(Box::new(ParsedCase {
        attachments: attachments(run_id, &test_case_id, obj),
        case,
        steps,
    }))
}

/// Parses every case document under `folder`, recursively.
#[must_use]
pub fn parse_run_folder(folder: &Path, run_id: &str) -> FolderReport {
    let mut report = FolderReport::default();
    for path in ReportScanner::new(folder).case_documents() {
        let value = match read_json_file(&path) {
            Ok(value) => value,
            Err(error) => {
                report.failures.push(DocumentFailure { path, error });
                continue;
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match parse_case_document(run_id, &file_name, &value) {
            ParseOutcome::Case(parsed) => report.cases.push(*parsed),
            ParseOutcome::Ignored => report.ignored += 1,
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(file_name: &str, doc: Value) -> ParsedCase {
        match parse_case_document("run-1", file_name, &doc) {
            ParseOutcome::Case(parsed) => *parsed,
            ParseOutcome::Ignored => panic!("expected a case for {file_name}"),
        }
    }

    #[test]
    fn case_id_comes_from_filename() {
        assert_eq!(test_case_id("Login Test #1", None), "login_test_1");
        assert_eq!(normalize_identifier("__Checkout--Flow__"), Some("checkout_flow".to_string()));
    }

    #[test]
    fn case_id_falls_back_to_name_then_raw_stem() {
        assert_eq!(test_case_id("###", Some("Guest Checkout")), "guest_checkout");
        assert_eq!(test_case_id("###", Some("!!!")), "###");
        assert_eq!(test_case_id("###", None), "###");
    }

    #[test]
    fn masks_authorization_in_any_case() {
        let masked =
            mask_headers(&json!({"Authorization": "Bearer xyz", "Accept": "json"})).unwrap();
        assert_eq!(Value::Object(masked), json!({"Authorization": "***", "Accept": "json"}));

        let masked = mask_headers(&json!({"authorization": "t"})).unwrap();
        assert_eq!(masked["authorization"], json!("***"));

        assert_eq!(mask_headers(&json!("Authorization: x")), None);
        assert_eq!(mask_headers(&json!(["a"])), None);
    }

    #[test]
    fn duration_sums_only_immediate_steps() {
        let doc = json!({
            "steps": [
                {"duration": 100, "children": [{"duration": 999}]},
                {"duration": 250}
            ]
        });
        assert_eq!(case_duration(doc.as_object().unwrap()), 350);

        let explicit = json!({"duration": 500, "steps": [{"duration": 100}]});
        assert_eq!(case_duration(explicit.as_object().unwrap()), 500);
    }

    #[test]
    fn duration_sum_saturates_instead_of_overflowing() {
        let doc = json!({
            "steps": [{"duration": i64::MAX}, {"duration": 1}, {"duration": 5}]
        });
        assert_eq!(case_duration(doc.as_object().unwrap()), i64::MAX);

        let negative = json!({"steps": [{"duration": i64::MIN}, {"duration": -1}]});
        assert_eq!(case_duration(negative.as_object().unwrap()), i64::MIN);
    }

    #[test]
    fn steps_flatten_in_preorder() {
        let parsed = parse(
            "flow.json",
            json!({
                "name": "Flow",
                "testSteps": [
                    {"description": "A", "children": [
                        {"description": "B", "children": [{"description": "C"}]}
                    ]},
                    {"description": "D"}
                ]
            }),
        );
        let names: Vec<(u32, &str)> = parsed
            .steps
            .iter()
            .map(|s| (s.step_order, s.name.as_deref().unwrap()))
            .collect();
        assert_eq!(names, vec![(1, "A"), (2, "B"), (3, "C"), (4, "D")]);
    }

    #[test]
    fn children_key_priority_picks_first_present_list() {
        let parsed = parse(
            "p.json",
            json!({
                "title": "P",
                "steps": [{"name": "root", "children": [], "steps": [{"name": "via steps"}]}]
            }),
        );
        let names: Vec<_> = parsed.steps.iter().map(|s| s.name.clone().unwrap()).collect();
        assert_eq!(names, ["root", "via steps"]);
    }

    #[test]
    fn documents_without_name_are_ignored() {
        assert_eq!(parse_case_document("r", "a.json", &json!([1, 2])), ParseOutcome::Ignored);
        assert_eq!(
            parse_case_document("r", "a.json", &json!({"result": "SUCCESS"})),
            ParseOutcome::Ignored
        );
        assert_eq!(parse_case_document("r", "a.json", &json!("text")), ParseOutcome::Ignored);
    }

    #[test]
    fn tags_and_user_story_resolve_feature_and_story() {
        let parsed = parse(
            "checkout.json",
            json!({
                "name": "Checkout",
                "result": "failure",
                "tags": [
                    {"name": "smoke", "type": "tag"},
                    {"name": "Payments", "type": "Story"},
                    {"tag": "Cart", "tagType": "feature"}
                ],
                "userStory": {"storyName": "Ignored story", "path": "ignored/path"},
                "testFailureCause": {"errorType": "AssertionError", "message": "expected 200"}
            }),
        );
        let case = parsed.case;
        assert_eq!(case.feature.as_deref(), Some("Payments"));
        assert_eq!(case.story.as_deref(), Some("Payments"));
        assert_eq!(case.tags, ["smoke", "Payments", "Cart"]);
        assert_eq!(case.status.as_deref(), Some("FAILURE"));
        assert_eq!(case.error_message.as_deref(), Some("expected 200"));
    }

    #[test]
    fn user_story_fills_missing_labels() {
        let parsed = parse(
            "search.json",
            json!({"name": "Search", "userStory": {"name": "Find items", "path": "search/basic"}}),
        );
        assert_eq!(parsed.case.story.as_deref(), Some("Find items"));
        assert_eq!(parsed.case.feature.as_deref(), Some("search/basic"));
        assert_eq!(parsed.case.status, None);
        assert!(!parsed.case.has_steps);
    }

    #[test]
    fn request_and_response_are_normalized() {
        let parsed = parse(
            "api.json",
            json!({
                "name": "API",
                "steps": [{
                    "description": "POST order",
                    "result": "SUCCESS",
                    "duration": 42,
                    "restQuery": {
                        "method": "POST",
                        "path": " `https://api.test/orders` ",
                        "content": "{\"id\":1}",
                        "contentType": "application/json",
                        "requestHeaders": "Authorization: Bearer abc\r\nnot a header line!\nX-Trace=42",
                        "statusCode": 201
                    },
                    "restResponse": {"statusCode": 201, "body": "created"}
                }]
            }),
        );
        let step = &parsed.steps[0];
        let request = step.request.as_ref().unwrap();
        assert_eq!(request.method.as_deref(), Some("POST"));
        assert_eq!(request.url.as_deref(), Some("https://api.test/orders"));
        assert_eq!(
            request.curl.as_deref(),
            Some(
                "curl --location --globoff 'https://api.test/orders' \\\n\
                 --header 'Content-Type: application/json' \\\n\
                 --header 'Authorization: Bearer abc' \\\n\
                 --header 'X-Trace: 42' \\\n\
                 --data '{\"id\":1}'"
            )
        );
        let headers = request.headers.as_ref().unwrap();
        assert_eq!(headers["Authorization"], json!("***"));
        assert_eq!(headers["X-Trace"], json!("42"));
        assert_eq!(
            request.request_headers,
            Some(json!("Authorization: Bearer abc\r\nnot a header line!\nX-Trace=42"))
        );

        let response = step.response.as_ref().unwrap();
        assert_eq!(response.status, Some(json!(201)));
        assert_eq!(response.body, Some(json!("created")));
        assert_eq!(step.status.as_deref(), Some("SUCCESS"));
        assert_eq!(step.duration, Some(serde_json::Number::from(42)));
    }

    #[test]
    fn missing_url_yields_no_curl_but_keeps_request() {
        let parsed = parse(
            "x.json",
            json!({"name": "X", "steps": [{"request": {"method": "GET"}}]}),
        );
        let request = parsed.steps[0].request.as_ref().unwrap();
        assert_eq!(request.curl, None);
        assert_eq!(request.method.as_deref(), Some("GET"));
    }

    #[test]
    fn attachments_merge_both_lists() {
        let parsed = parse(
            "ui.json",
            json!({
                "name": "UI",
                "attachments": [{"name": "log", "path": "log.txt", "type": "text"}, "skip-me"],
                "screenshots": [{"title": "home", "source": "home.png", "format": "png"}]
            }),
        );
        assert!(parsed.case.has_attachment);
        let names: Vec<_> = parsed
            .attachments
            .iter()
            .map(|a| (a.name.clone(), a.path.clone(), a.kind.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                (Some("log".into()), Some("log.txt".into()), Some("text".into())),
                (Some("home".into()), Some("home.png".into()), Some("png".into())),
            ]
        );
    }

    #[test]
    fn header_lines_tolerate_backticks_and_garbage() {
        let lines = parse_header_lines("`Accept: json`\n\n: nope\n9bad: x\nX-A = 1");
        assert_eq!(
            lines,
            vec![
                ("Accept".to_string(), "json".to_string()),
                ("X-A".to_string(), "1".to_string()),
            ]
        );
    }
}
