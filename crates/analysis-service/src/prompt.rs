use common::cameras::Analytic;

pub const BASE_PROMPT: &str = "Describe the main objects, people, and activities in this image.";

/// Focus sentence for a catalog analytic, keyed by analytic id
fn focus_hint(analytic_id: &str) -> Option<&'static str> {
    match analytic_id {
        "FaceRecognition" => Some("Pay special attention to faces and identify if any known individuals are present."),
        "LPR" => Some("Identify any license plates visible and read their characters."),
        "ObjectDetection" => Some("Detect and list specific objects such as vehicles, packages, or tools."),
        "AnomalyDetection" => Some("Look for any unusual or suspicious behavior or objects."),
        "FireSmokeDetection" => Some("Report any visible fire or smoke."),
        "IntrusionDetection" => Some("Note any person entering an area they appear unauthorized to be in."),
        _ => None,
    }
}

/// Frame prompt for the analytics applied to a camera
pub fn build_frame_prompt(applied: &[&Analytic]) -> String {
    let mut prompt = BASE_PROMPT.to_string();
    for analytic in applied {
        if let Some(hint) = focus_hint(&analytic.id) {
            prompt.push(' ');
            prompt.push_str(hint);
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analytic(id: &str) -> Analytic {
        Analytic {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            icon_name: String::new(),
            tags: vec![],
        }
    }

    #[test]
    fn test_base_prompt_without_analytics() {
        assert_eq!(build_frame_prompt(&[]), BASE_PROMPT);
    }

    #[test]
    fn test_hints_follow_applied_order() {
        let lpr = analytic("LPR");
        let fire = analytic("FireSmokeDetection");
        let custom = analytic("Custom");
        let prompt = build_frame_prompt(&[&fire, &custom, &lpr]);

        assert!(prompt.starts_with(BASE_PROMPT));
        let fire_at = prompt.find("fire or smoke").unwrap();
        let plate_at = prompt.find("license plates").unwrap();
        assert!(fire_at < plate_at);
    }
}
