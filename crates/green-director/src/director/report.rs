use crate::director::descriptor::{CI, CPU_TIME, PUE};
use crate::director::scoring::{RankedQueue, round_to};

fn format_metric(queue: &RankedQueue, key: &str, digits: usize) -> String {
    match queue.parameters.get(key).and_then(|value| value.as_f64()) {
        Some(value) => format!("{:.*}", digits, round_to(value, digits as i32)),
        None => "-".to_string(),
    }
}

/// Human-readable line of the cycle report.
pub fn format_report_line(rank: usize, queue: &RankedQueue) -> String {
    let cpu_time = queue
        .parameters
        .get(CPU_TIME)
        .map(|value| value.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "#{rank} {:40} | Site: {:10} | CE: {:12} | CPU: {:>6} | PUE: {:>4} | CI: {:>5} | Load: {:.2} | Score: {}",
        queue.queue_name,
        queue.site,
        queue.ce_name,
        cpu_time,
        format_metric(queue, PUE, 2),
        format_metric(queue, CI, 1),
        queue.load.load_factor(),
        queue.score
    );
    if !queue.load.is_live() {
        line.push_str(" [probe failed]");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::format_report_line;
    use crate::director::ce::LoadSnapshot;
    use crate::director::descriptor::{ParameterMap, ParameterValue};
    use crate::director::probe::ProbeOutcome;
    use crate::director::scoring::{QueueScore, RankedQueue};

    fn ranked(name: &str, site: &str, ce: &str, parameters: ParameterMap) -> RankedQueue {
        RankedQueue {
            queue_name: name.to_string(),
            site: site.to_string(),
            ce_name: ce.to_string(),
            ce_type: "HTCondorCE".to_string(),
            parameters,
            score: QueueScore::Composite { value: 18.0 },
            load: ProbeOutcome::live(LoadSnapshot::new(100, 50, 300)).unwrap(),
            issues: vec![],
        }
    }

    #[test]
    fn report_line() {
        let parameters: ParameterMap = [
            ("CPUTime".to_string(), ParameterValue::Integer(3600)),
            ("PUE".to_string(), ParameterValue::Float(1.1)),
            ("CI".to_string(), ParameterValue::Float(15.4)),
        ]
        .into_iter()
        .collect();
        let queue = ranked("ce1.cern_short", "CERN.ch", "ce1.cern", parameters);
        insta::assert_snapshot!(format_report_line(1, &queue), @"#1 ce1.cern_short                           | Site: CERN.ch    | CE: ce1.cern     | CPU:   3600 | PUE: 1.10 | CI:  15.4 | Load: 0.50 | Score: 18.00");
    }

    #[test]
    fn report_line_of_degraded_queue() {
        let parameters: ParameterMap = [
            ("CPUTime".to_string(), ParameterValue::Integer(86400)),
            ("CI".to_string(), ParameterValue::Float(40.0)),
        ]
        .into_iter()
        .collect();
        let mut queue = ranked("ce2.fnal_long", "FNAL.us", "ce2.fnal", parameters);
        queue.score = QueueScore::Composite {
            value: f64::INFINITY,
        };
        queue.load = ProbeOutcome::fallback(1.0, "connection refused".to_string());
        insta::assert_snapshot!(format_report_line(16, &queue), @"#16 ce2.fnal_long                            | Site: FNAL.us    | CE: ce2.fnal     | CPU:  86400 | PUE:    - | CI:  40.0 | Load: 1.00 | Score: worst [probe failed]");
    }
}
