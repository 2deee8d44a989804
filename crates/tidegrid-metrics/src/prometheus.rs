//! Prometheus text exposition format.
//!
//! Renders the latest decision event of each target into gauges for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use tidegrid_state::{DecisionEvent, Recommendation};

/// Render the latest decision per target into Prometheus text format.
///
/// Every gauge carries a `target` label. Metric ratios add a `metric`
/// label; recommendations add `container` and `resource`.
pub fn render_prometheus(events: &[DecisionEvent]) -> String {
    let mut out = String::new();

    header(&mut out, "tidegrid_current_replicas", "Replica count observed at the last tick.");
    for e in events {
        if let Some(replicas) = e.current_replicas {
            line(&mut out, "tidegrid_current_replicas", &target_label(e), replicas);
        }
    }

    header(&mut out, "tidegrid_candidate_replicas", "Unstabilized replica recommendation.");
    for e in events {
        if let Some(h) = &e.horizontal {
            line(&mut out, "tidegrid_candidate_replicas", &target_label(e), h.candidate);
        }
    }

    header(&mut out, "tidegrid_stabilized_replicas", "Replica count after stabilization.");
    for e in events {
        if let Some(h) = &e.horizontal {
            line(&mut out, "tidegrid_stabilized_replicas", &target_label(e), h.stabilized);
        }
    }

    header(&mut out, "tidegrid_metric_ratio", "Observed average divided by the metric target.");
    for e in events {
        for m in &e.metrics {
            let labels = format!("{},metric=\"{}\"", target_label(e), escape(&m.name));
            line(&mut out, "tidegrid_metric_ratio", &labels, format_args!("{:.4}", m.ratio));
        }
    }

    let bounds: [(&str, &str, fn(&Recommendation) -> u64); 3] = [
        (
            "tidegrid_recommendation_lower_bound",
            "Lower bound of the vertical recommendation.",
            |r| r.lower_bound,
        ),
        (
            "tidegrid_recommendation_target",
            "Target of the vertical recommendation.",
            |r| r.target,
        ),
        (
            "tidegrid_recommendation_upper_bound",
            "Upper bound of the vertical recommendation.",
            |r| r.upper_bound,
        ),
    ];
    for (name, help, pick) in bounds {
        header(&mut out, name, help);
        for e in events {
            for r in &e.recommendations {
                let labels = format!(
                    "{},container=\"{}\",resource=\"{}\"",
                    target_label(e),
                    escape(&r.container_name),
                    r.resource
                );
                line(&mut out, name, &labels, pick(r));
            }
        }
    }

    header(
        &mut out,
        "tidegrid_vertical_suppressed",
        "1 if the conflict guard withheld vertical actuation at the last tick.",
    );
    for e in events {
        line(
            &mut out,
            "tidegrid_vertical_suppressed",
            &target_label(e),
            u8::from(e.conflict.vertical_suppressed),
        );
    }

    header(&mut out, "tidegrid_tick_error", "1 if the last tick ended with an error.");
    for e in events {
        line(&mut out, "tidegrid_tick_error", &target_label(e), u8::from(e.error.is_some()));
    }

    out
}

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

fn line(out: &mut String, name: &str, labels: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{name}{{{labels}}} {value}");
}

fn target_label(event: &DecisionEvent) -> String {
    format!("target=\"{}\"", escape(&event.target_id))
}

/// Escape a label value per the exposition format.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidegrid_state::{Actuation, HorizontalOutcome, MetricRatio, ResourceName};

    fn test_event(target_id: &str) -> DecisionEvent {
        let mut event = DecisionEvent::empty(target_id, 1000);
        event.current_replicas = Some(2);
        event.metrics.push(MetricRatio {
            name: "cpu".to_string(),
            average: 90.0,
            target_value: 50.0,
            ratio: 1.8,
            desired: 4,
        });
        event.horizontal = Some(HorizontalOutcome {
            candidate: 4,
            stabilized: 4,
            actuation: Actuation::Applied,
        });
        event.recommendations.push(Recommendation {
            container_name: "app".to_string(),
            resource: ResourceName::Memory,
            lower_bound: 100,
            target: 200,
            upper_bound: 300,
        });
        event
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Type declarations are always present.
        assert!(output.contains("# HELP tidegrid_current_replicas"));
        assert!(output.contains("# TYPE tidegrid_stabilized_replicas gauge"));
    }

    #[test]
    fn render_single_target() {
        let output = render_prometheus(&[test_event("prod/deployment/api")]);

        assert!(output.contains("tidegrid_current_replicas{target=\"prod/deployment/api\"} 2"));
        assert!(output.contains("tidegrid_candidate_replicas{target=\"prod/deployment/api\"} 4"));
        assert!(output.contains(
            "tidegrid_metric_ratio{target=\"prod/deployment/api\",metric=\"cpu\"} 1.8000"
        ));
        assert!(output.contains(
            "tidegrid_recommendation_upper_bound{target=\"prod/deployment/api\",container=\"app\",resource=\"memory\"} 300"
        ));
        assert!(output.contains("tidegrid_tick_error{target=\"prod/deployment/api\"} 0"));
    }

    #[test]
    fn errored_tick_is_flagged() {
        let mut event = DecisionEvent::empty("t", 1);
        event.error = Some("metrics unavailable".to_string());
        let output = render_prometheus(&[event]);

        assert!(output.contains("tidegrid_tick_error{target=\"t\"} 1"));
        assert!(!output.contains("tidegrid_current_replicas{"));
    }

    #[test]
    fn label_values_are_escaped() {
        let output = render_prometheus(&[DecisionEvent::empty("a\"b", 1)]);
        assert!(output.contains("target=\"a\\\"b\""));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&[test_event("x"), test_event("y")]);

        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains('}'),
                "line should have labels: {line}"
            );
        }
    }
}
