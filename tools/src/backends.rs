//! File- and process-backed collaborators for the runner.

use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use triage_core::{
    case::Case,
    classifier::{ClassificationRequest, PlanningRequest},
    collaborator::{CaseSource, ClassificationService, TicketUpdater},
    config::CallTimeouts,
    types::CaseId,
    verdict::TicketUpdate,
    TriageError, TriageResult,
};

/// Cases stored as `<dir>/<case_id>.json`.
pub struct DirCaseSource {
    dir: PathBuf,
}

impl DirCaseSource {
    pub fn new(dir: &str) -> Self {
        Self { dir: PathBuf::from(dir) }
    }
}

/// A case id must name a file directly inside the case directory.
fn is_plain_file_name(case_id: &str) -> bool {
    let mut parts = Path::new(case_id).components();
    matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None))
        && !case_id.contains(['/', '\\'])
        && !case_id.contains("..")
}

impl CaseSource for DirCaseSource {
    fn fetch_case(&self, case_id: &str) -> TriageResult<Case> {
        if !is_plain_file_name(case_id) {
            return Err(TriageError::DataNotFound(format!("case id '{case_id}' is not a file name")));
        }
        let path = self.dir.join(format!("{case_id}.json"));
        let content = std::fs::read_to_string(&path)
            .map_err(|_| TriageError::DataNotFound(format!("case {case_id} ({})", path.display())))?;
        let mut case: Case = serde_json::from_str(&content)?;
        if case.case_id.is_empty() {
            case.case_id = case_id.to_string();
        }
        Ok(case)
    }

    fn open_case_ids(&self) -> TriageResult<Vec<CaseId>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            TriageError::upstream("case_source", format!("{}: {e}", self.dir.display()))
        })?;
        let mut ids: Vec<CaseId> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Serialize)]
#[serde(tag = "call", content = "request", rename_all = "snake_case")]
enum ServiceCall<'a> {
    Plan(&'a PlanningRequest),
    Classify(&'a ClassificationRequest),
}

const POLL: Duration = Duration::from_millis(10);

/// Runs a shell command per call: request JSON on stdin, raw answer on
/// stdout. `TRIAGE_CALL` tells the command which call it is serving.
///
/// The child is killed once its call's deadline passes, so nothing keeps
/// running after the engine has recorded a timeout.
pub struct CommandClassifier {
    command:  String,
    planning: Duration,
    classify: Duration,
}

impl CommandClassifier {
    pub fn new(command: &str, timeouts: &CallTimeouts) -> Self {
        Self {
            command:  command.to_string(),
            planning: timeouts.planning(),
            classify: timeouts.classification(),
        }
    }

    fn call(&self, name: &str, call: &ServiceCall<'_>, deadline: Duration) -> TriageResult<String> {
        let input = serde_json::to_vec(call)?;
        let started = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("TRIAGE_CALL", name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| TriageError::upstream(name, format!("cannot start classifier: {e}")))?;

        // Feed stdin and drain stdout concurrently; either pipe can fill.
        if let Some(mut stdin) = child.stdin.take() {
            let call_name = name.to_string();
            thread::spawn(move || match stdin.write_all(&input) {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    log::debug!("{call_name}: classifier closed stdin before reading the request");
                }
                Err(e) => log::warn!("{call_name}: cannot send request: {e}"),
                Ok(()) => {}
            });
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        let stdout = child.stdout.take();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let read = match stdout {
                Some(mut out) => out.read_to_end(&mut buf).map(|_| buf),
                None => Ok(buf),
            };
            let _ = tx.send(read);
        });

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= deadline => {
                    kill(&mut child, name);
                    return Err(timed_out(name, deadline));
                }
                Ok(None) => thread::sleep(POLL),
                Err(e) => {
                    kill(&mut child, name);
                    return Err(TriageError::upstream(name, e.to_string()));
                }
            }
        };
        if !status.success() {
            return Err(TriageError::upstream(name, format!("classifier exited with {status}")));
        }

        // A background process left holding stdout must not outlive the deadline.
        let output = match rx.recv_timeout(deadline.saturating_sub(started.elapsed()).max(POLL)) {
            Ok(read) => read.map_err(|e| TriageError::upstream(name, format!("cannot read answer: {e}")))?,
            Err(RecvTimeoutError::Timeout) => return Err(timed_out(name, deadline)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TriageError::upstream(name, "output reader stopped without a result"));
            }
        };
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

fn kill(child: &mut Child, name: &str) {
    if let Err(e) = child.kill() {
        log::warn!("{name}: cannot kill classifier: {e}");
    }
    let _ = child.wait();
}

fn timed_out(name: &str, deadline: Duration) -> TriageError {
    log::warn!("{name}: classifier exceeded {}ms", deadline.as_millis());
    TriageError::Timeout {
        call:       name.to_string(),
        timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
    }
}

impl ClassificationService for CommandClassifier {
    fn plan(&self, request: &PlanningRequest) -> TriageResult<String> {
        self.call("plan", &ServiceCall::Plan(request), self.planning)
    }

    fn classify(&self, request: &ClassificationRequest) -> TriageResult<String> {
        self.call("classify", &ServiceCall::Classify(request), self.classify)
    }
}

/// Appends each update as one JSON line.
pub struct JsonlTicketUpdater {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlTicketUpdater {
    pub fn new(path: &str) -> Self {
        Self { path: Path::new(path).to_path_buf(), lock: Mutex::new(()) }
    }
}

impl TicketUpdater for JsonlTicketUpdater {
    fn apply(&self, case_id: &str, update: &TicketUpdate) -> TriageResult<()> {
        let line = serde_json::to_string(&serde_json::json!({ "case_id": case_id, "update": update }))?;
        let _guard = self.lock.lock().map_err(|_| {
            TriageError::upstream("ticket_log", "writer lock poisoned")
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TriageError::upstream("ticket_log", format!("{}: {e}", self.path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| TriageError::upstream("ticket_log", e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::config::TriageConfig;

    #[test]
    fn cases_are_read_from_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("C-1.json"),
            r#"{"subject": "Tampering", "structured": {"IMEI": "356938035643809"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirCaseSource::new(dir.path().to_str().unwrap());
        let case = source.fetch_case("C-1").unwrap();
        assert_eq!(case.case_id, "C-1");
        assert_eq!(case.structured.imei.as_deref(), Some("356938035643809"));
        assert_eq!(source.open_case_ids().unwrap(), vec!["C-1".to_string()]);
        assert_eq!(source.fetch_case("C-2").unwrap_err().kind(), "data_not_found");
    }

    #[test]
    fn updates_are_appended_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updates.jsonl");
        let updater = JsonlTicketUpdater::new(path.to_str().unwrap());
        let update = TicketUpdate {
            fraud_status:   Some("Not fraud".into()),
            case_outcome:   "No action".into(),
            allegation:     None,
            reason:         "Suspected Fraud".into(),
            sub_reason:     "Cash Payments".into(),
            account_number: None,
            suspect_type:   None,
            suspect_name:   None,
            suspect_phone:  None,
            case_details:   String::new(),
            public_comment: "Reviewed.".into(),
        };
        updater.apply("C-1", &update).unwrap();
        updater.apply("C-2", &update).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["case_id"], "C-2");
    }

    #[test]
    fn case_ids_cannot_leave_the_case_directory() {
        let root = tempfile::tempdir().unwrap();
        let cases = root.path().join("cases");
        std::fs::create_dir(&cases).unwrap();
        std::fs::write(root.path().join("secret.json"), r#"{"subject": "outside"}"#).unwrap();

        let source = DirCaseSource::new(cases.to_str().unwrap());
        for id in ["../secret", "sub/C-1", "..", "/etc/passwd", ""] {
            let err = source.fetch_case(id).unwrap_err();
            assert_eq!(err.kind(), "data_not_found", "{id}");
        }
    }

    fn classifier(command: &str) -> CommandClassifier {
        CommandClassifier::new(command, &TriageConfig::default().timeouts)
    }

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn classifier_command_output_is_returned_raw() {
        let ok = classifier("cat >/dev/null; echo '{\"ok\": true}'");
        let out = ok.call("plan", &ServiceCall::Classify(&dummy_request()), LONG).unwrap();
        assert_eq!(out.trim(), r#"{"ok": true}"#);

        let failing = classifier("exit 3");
        let err = failing.call("plan", &ServiceCall::Classify(&dummy_request()), LONG).unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
    }

    #[test]
    fn answer_counts_even_if_the_request_is_never_read() {
        let mut request = dummy_request();
        request.case_details = "x".repeat(1 << 20);
        let out = classifier("echo '{\"ok\": true}'")
            .call("classify", &ServiceCall::Classify(&request), LONG)
            .unwrap();
        assert_eq!(out.trim(), r#"{"ok": true}"#);
    }

    #[test]
    fn large_request_and_large_answer_do_not_block() {
        let mut request = dummy_request();
        request.case_details = "x".repeat(1 << 20);
        let out = classifier("cat")
            .call("classify", &ServiceCall::Classify(&request), LONG)
            .unwrap();
        assert!(out.len() > 1 << 20);
        assert!(out.starts_with(r#"{"call":"classify""#));
    }

    #[test]
    fn overdue_classifier_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let slow = classifier(&format!("cat >/dev/null; sleep 1; touch '{}'", marker.display()));

        let started = Instant::now();
        let err = slow
            .call("classify", &ServiceCall::Classify(&dummy_request()), Duration::from_millis(200))
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(started.elapsed() < Duration::from_millis(900));

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "classifier kept running after its deadline");
    }

    fn dummy_request() -> ClassificationRequest {
        use triage_core::{extractor::IdentifierSet, planner::{FraudType, RiskTier}};
        ClassificationRequest {
            case_id:         "C-1".into(),
            subject:         String::new(),
            case_details:    String::new(),
            conversations:   String::new(),
            fraud_type:      FraudType::Unknown,
            risk_tier:       RiskTier::Low,
            identifiers:     IdentifierSet::default(),
            phones_seen:     Vec::new(),
            suspect_name_hint: None,
            account_profile: None,
            risk_signals:    None,
            historical_case_count: 0,
            historical_cases: Vec::new(),
            behavioral:      None,
            stages_executed: Vec::new(),
            allegations:     Vec::new(),
            calibration:     Vec::new(),
        }
    }
}
