use rove_core::{ExecutionReport, ModelReport, ModelSession};

/// Prints stage reports for the terminal, or as JSON lines
#[derive(Clone, Copy)]
pub struct ReportOutput {
    json: bool,
}

impl ReportOutput {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn print(&self, message: &str) {
        if !self.json {
            println!("{}", message);
        }
    }

    pub fn stage(&self, stage: &str, reports: &[ModelReport]) {
        if self.json {
            let line = serde_json::json!({ "stage": stage, "reports": reports });
            println!("{}", line);
            return;
        }
        println!("== {} ==", stage);
        for report in reports {
            println!("{}", format_report(report));
        }
    }

    pub fn plan(&self, session: &ModelSession) {
        if self.json {
            let line = serde_json::json!({ "model": session.model, "steps": session.steps });
            println!("{}", line);
            return;
        }
        println!("-- plan from {} --", session.model);
        for step in &session.steps {
            let target = if step.target_url.is_empty() { "-" } else { step.target_url.as_str() };
            println!("  {}. {} [{}] ({})", step.index, step.description, target, step.status);
        }
    }

    pub fn execution(&self, execution: &ExecutionReport) {
        if self.json {
            if let Ok(line) = serde_json::to_string(execution) {
                println!("{}", line);
            }
            return;
        }
        println!("== Execute ({}) ==", execution.report.model);
        for step in &execution.steps {
            match &step.error {
                None => println!("  step {}: ok ({} attempt(s))", step.index, step.attempts),
                Some(error) => {
                    println!("  step {}: failed: {}", step.index, error);
                    for line in &step.log_tail {
                        println!("    | {}", line);
                    }
                }
            }
        }
        println!("{}", format_report(&execution.report));
    }
}

fn format_report(report: &ModelReport) -> String {
    let mark = if report.ok { "ok" } else { "--" };
    format!("  [{}] {} {}: {}", mark, report.model, report.state, report.reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rove_core::SessionState;

    #[test]
    fn test_format_report() {
        let report = ModelReport {
            model: "openai.default".to_string(),
            state: SessionState::NeedsEntry,
            ok: false,
            reason: "plan has steps with unknown status".to_string(),
        };
        assert_eq!(
            format_report(&report),
            "  [--] openai.default NEEDS_ENTRY: plan has steps with unknown status"
        );
    }
}
