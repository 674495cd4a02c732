//! Bridge between raw model output and structured actions.
//!
//! An empty prediction fails the call. A prediction the parser rejects does
//! not: the call succeeds with no actions and the failure is only logged.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::errors::{VlmError, VlmResult};
use crate::llm::types::{
    ActionInputs, Factors, InvokeOutput, ModelVersion, PredictionParsed, ProviderKind,
    RawPrediction, ScreenContext, IMAGE_FACTOR, MIN_PIXELS,
};

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("prediction has no Action section")]
    MissingAction,

    #[error("malformed action: {0}")]
    InvalidAction(String),

    #[error("malformed box argument '{0}'")]
    InvalidBox(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub prediction: &'a str,
    pub factors: Factors,
    pub screen_context: ScreenContext,
    pub scale_factor: f64,
    pub model_version: ModelVersion,
}

/// Turns raw model text into an ordered action list.
pub trait ActionParser: Send + Sync {
    fn parse(&self, request: ParseRequest<'_>) -> Result<Vec<PredictionParsed>, ParseError>;
}

/// Reject empty output, otherwise attach parsed actions (empty on parse failure).
pub fn finalize(
    parser: &dyn ActionParser,
    provider: ProviderKind,
    raw: RawPrediction,
    factors: Factors,
    screen_context: ScreenContext,
    scale_factor: f64,
    model_version: ModelVersion,
) -> VlmResult<InvokeOutput> {
    if raw.prediction.trim().is_empty() {
        tracing::error!(provider = %provider, response_id = ?raw.response_id, "vlm response error: empty prediction");
        return Err(VlmError::EmptyResponse {
            provider,
            detail: "no prediction text".into(),
        });
    }

    let request = ParseRequest {
        prediction: &raw.prediction,
        factors,
        screen_context,
        scale_factor,
        model_version,
    };
    let parsed_predictions = match parser.parse(request) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!(provider = %provider, error = %e, "action parsing error");
            Vec::new()
        }
    };

    Ok(InvokeOutput {
        prediction: raw.prediction,
        parsed_predictions,
        cost_time: raw.cost_time,
        cost_tokens: raw.cost_tokens,
        response_id: raw.response_id,
    })
}

/// Parser for `Thought: ... Action: name(key='value')` style output.
#[derive(Debug, Clone, Copy, Default)]
pub struct UiTarsActionParser;

impl ActionParser for UiTarsActionParser {
    fn parse(&self, request: ParseRequest<'_>) -> Result<Vec<PredictionParsed>, ParseError> {
        let text = request.prediction.trim();
        let action_start = text.rfind("Action:").ok_or(ParseError::MissingAction)?;
        let head = &text[..action_start];
        let action_str = text[action_start + "Action:".len()..].trim();

        let reflection = section(head, "Reflection:", &["Action_Summary:", "Thought:"]);
        let thought = section(head, "Thought:", &[])
            .or_else(|| section(head, "Action_Summary:", &[]))
            .unwrap_or_default();

        let (width, height) = coordinate_space(&request);

        action_str
            .split("\n\n")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|raw_action| {
                let (action_type, args) = split_call(raw_action)?;
                let mut inputs = ActionInputs::default();
                for (key, value) in args {
                    if key.ends_with("box") || key.ends_with("point") {
                        let bbox = parse_box(&value, width, height)?;
                        let coords = screen_coords(&bbox, &request);
                        if key.starts_with("end") {
                            inputs.end_box = Some(bbox);
                            inputs.end_coords = coords;
                        } else {
                            inputs.start_box = Some(bbox);
                            inputs.start_coords = coords;
                        }
                    } else {
                        inputs.extra.insert(key, unescape(&value));
                    }
                }
                Ok(PredictionParsed {
                    reflection: reflection.clone(),
                    thought: thought.clone(),
                    action_type,
                    action_inputs: inputs,
                })
            })
            .collect()
    }
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^(\w+)\((.*)\)$").expect("static regex"))
}

fn arg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)(\w+)\s*=\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
            .expect("static regex")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex"))
}

/// Text following `label` up to the first of `stops` (or the end).
fn section(text: &str, label: &str, stops: &[&str]) -> Option<String> {
    let start = text.find(label)? + label.len();
    let rest = &text[start..];
    let end = stops
        .iter()
        .filter_map(|s| rest.find(s))
        .min()
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn split_call(raw: &str) -> Result<(String, Vec<(String, String)>), ParseError> {
    let caps = call_regex()
        .captures(raw)
        .ok_or_else(|| ParseError::InvalidAction(raw.to_string()))?;
    let name = caps[1].to_string();
    let args = arg_regex()
        .captures_iter(&caps[2])
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map_or("", |m| m.as_str());
            (c[1].to_string(), value.to_string())
        })
        .collect();
    Ok((name, args))
}

fn unescape(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .replace("\\'", "'")
        .replace("\\\"", "\"")
}

/// Divisors that map model coordinates to `0..1` ratios.
fn coordinate_space(request: &ParseRequest<'_>) -> (f64, f64) {
    if request.model_version == ModelVersion::V1_5
        && request.screen_context.width > 0
        && request.screen_context.height > 0
    {
        let (h, w) = smart_resize(
            request.screen_context.height as u64,
            request.screen_context.width as u64,
            request.model_version.max_pixels(),
        );
        return (w as f64, h as f64);
    }
    (request.factors[0] as f64, request.factors[1] as f64)
}

/// `(height, width)` snapped to the patch grid and kept inside the pixel range.
pub fn smart_resize(height: u64, width: u64, max_pixels: u64) -> (u64, u64) {
    let factor = IMAGE_FACTOR as f64;
    let (h, w) = (height as f64, width as f64);
    let mut h_bar = ((h / factor).round() * factor).max(factor);
    let mut w_bar = ((w / factor).round() * factor).max(factor);
    if h_bar * w_bar > max_pixels as f64 {
        let beta = (h * w / max_pixels as f64).sqrt();
        h_bar = ((h / beta / factor).floor() * factor).max(factor);
        w_bar = ((w / beta / factor).floor() * factor).max(factor);
    } else if h_bar * w_bar < MIN_PIXELS as f64 {
        let beta = (MIN_PIXELS as f64 / (h * w)).sqrt();
        h_bar = (h * beta / factor).ceil() * factor;
        w_bar = (w * beta / factor).ceil() * factor;
    }
    (h_bar as u64, w_bar as u64)
}

fn parse_box(value: &str, width: f64, height: f64) -> Result<[f64; 4], ParseError> {
    let nums: Vec<f64> = number_regex()
        .find_iter(value)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    let [x1, y1, x2, y2] = match nums.as_slice() {
        [x, y] => [*x, *y, *x, *y],
        [x1, y1, x2, y2] => [*x1, *y1, *x2, *y2],
        _ => return Err(ParseError::InvalidBox(value.to_string())),
    };
    Ok([
        round4(x1 / width),
        round4(y1 / height),
        round4(x2 / width),
        round4(y2 / height),
    ])
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn screen_coords(bbox: &[f64; 4], request: &ParseRequest<'_>) -> Option<[f64; 2]> {
    let ScreenContext { width, height } = request.screen_context;
    if width == 0 || height == 0 {
        return None;
    }
    let scale = if request.scale_factor > 0.0 {
        request.scale_factor
    } else {
        1.0
    };
    let cx = (bbox[0] + bbox[2]) / 2.0;
    let cy = (bbox[1] + bbox[3]) / 2.0;
    Some([
        (cx * width as f64 * scale).round(),
        (cy * height as f64 * scale).round(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(prediction: &str) -> ParseRequest<'_> {
        ParseRequest {
            prediction,
            factors: [1000, 1000],
            screen_context: ScreenContext {
                width: 1920,
                height: 1080,
            },
            scale_factor: 1.0,
            model_version: ModelVersion::V1_0,
        }
    }

    struct Failing;

    impl ActionParser for Failing {
        fn parse(&self, _: ParseRequest<'_>) -> Result<Vec<PredictionParsed>, ParseError> {
            Err(ParseError::MissingAction)
        }
    }

    #[test]
    fn click_with_point() {
        let parsed = UiTarsActionParser
            .parse(request(
                "Thought: the start button is bottom left\nAction: click(start_box='(100,900)')",
            ))
            .unwrap();
        assert_eq!(parsed.len(), 1);
        let action = &parsed[0];
        assert_eq!(action.thought, "the start button is bottom left");
        assert_eq!(action.action_type, "click");
        assert_eq!(action.action_inputs.start_box, Some([0.1, 0.9, 0.1, 0.9]));
        assert_eq!(action.action_inputs.start_coords, Some([192.0, 972.0]));
    }

    #[test]
    fn multiple_actions_and_text_args() {
        let parsed = UiTarsActionParser
            .parse(request(
                "Reflection: last click missed\nThought: type the query\nAction: type(content='hello\\n')\n\nhotkey(key='enter')",
            ))
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].reflection.as_deref(), Some("last click missed"));
        assert_eq!(parsed[0].action_inputs.extra["content"], "hello\n");
        assert_eq!(parsed[1].action_type, "hotkey");
        assert_eq!(parsed[1].action_inputs.extra["key"], "enter");
    }

    #[test]
    fn box_markers_and_drag() {
        let parsed = UiTarsActionParser
            .parse(request(
                "Thought: drag\nAction: drag(start_box='<|box_start|>(0,0,200,200)<|box_end|>', end_box='(500,500)')",
            ))
            .unwrap();
        let inputs = &parsed[0].action_inputs;
        assert_eq!(inputs.start_box, Some([0.0, 0.0, 0.2, 0.2]));
        assert_eq!(inputs.end_box, Some([0.5, 0.5, 0.5, 0.5]));
        assert_eq!(inputs.end_coords, Some([960.0, 540.0]));
    }

    #[test]
    fn v1_5_uses_resized_screen_space() {
        let mut req = request("Action: click(start_box='(952,532)')");
        req.model_version = ModelVersion::V1_5;
        // 1920x1080 snaps to 1932x1092 under the 1.5 budget
        let parsed = UiTarsActionParser.parse(req).unwrap();
        let bbox = parsed[0].action_inputs.start_box.unwrap();
        assert_eq!(bbox[0], round4(952.0 / 1932.0));
        assert_eq!(bbox[1], round4(532.0 / 1092.0));
    }

    #[test]
    fn missing_action_is_an_error() {
        assert_eq!(
            UiTarsActionParser.parse(request("Thought: nothing to do")),
            Err(ParseError::MissingAction)
        );
        assert!(matches!(
            UiTarsActionParser.parse(request("Action: click(start_box='(1)')")),
            Err(ParseError::InvalidBox(_))
        ));
    }

    #[test]
    fn parser_failure_degrades_to_empty_actions() {
        let raw = RawPrediction {
            prediction: "gibberish".into(),
            cost_time: 12,
            cost_tokens: 34,
            response_id: None,
        };
        let out = finalize(
            &Failing,
            ProviderKind::OpenAiChat,
            raw,
            [1000, 1000],
            ScreenContext::default(),
            1.0,
            ModelVersion::V1_0,
        )
        .unwrap();
        assert!(out.parsed_predictions.is_empty());
        assert_eq!(out.cost_time, 12);
        assert_eq!(out.cost_tokens, 34);
    }

    #[test]
    fn empty_prediction_is_fatal() {
        let err = finalize(
            &UiTarsActionParser,
            ProviderKind::Ollama,
            RawPrediction::default(),
            [1000, 1000],
            ScreenContext::default(),
            1.0,
            ModelVersion::V1_0,
        )
        .unwrap_err();
        assert!(matches!(err, VlmError::EmptyResponse { .. }));
    }
}
