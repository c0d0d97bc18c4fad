//! The `utility` action: randomness, identifiers, arithmetic, clocks and
//! sleeping.
//!
//! Randomness comes from one [`StdRng`] per action. It is seeded from the
//! OS unless [`UtilityConfig::random_seed`] is set, in which case two
//! actions with the same seed produce identical sequences for identical
//! calls.

mod id;
mod math;
mod random;
mod time;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde_json::Value;
use stepkit_action::{
    ActionContext, ActionOutput, BuiltinAction, Inputs, OperationError, parse_input,
    unknown_operation,
};
use tracing::debug;

use crate::config::UtilityConfig;

use self::math::Numeric;
use self::random::WeightedItem;
use self::time::{MAX_SLEEP, TimeFormat, Zone, parse_duration};

const OPERATIONS: &[&str] = &[
    "random_int",
    "random_choose",
    "random_sample",
    "random_weighted",
    "random_shuffle",
    "id_uuid",
    "id_nanoid",
    "id_custom",
    "math_clamp",
    "math_round",
    "math_min",
    "math_max",
    "timestamp",
    "sleep",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntInput {
    min: i64,
    max: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ItemsInput {
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SampleInput {
    items: Vec<Value>,
    count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightedInput {
    items: Vec<WeightedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoInput {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NanoidInput {
    #[serde(default)]
    length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CustomIdInput {
    length: usize,
    alphabet: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClampInput {
    value: Numeric,
    min: Numeric,
    max: Numeric,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoundInput {
    value: Numeric,
    #[serde(default)]
    decimals: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValuesInput {
    values: Vec<Numeric>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimestampInput {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SleepInput {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    milliseconds: Option<u64>,
}

/// Pure-compute and time primitives.
pub struct UtilityAction {
    rng: Mutex<StdRng>,
    config: UtilityConfig,
}

impl UtilityAction {
    /// Build from configuration.
    pub fn new(config: &UtilityConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng: Mutex::new(rng),
            config: config.clone(),
        }
    }

    /// Whether the random source is seeded (deterministic).
    pub fn is_deterministic(&self) -> bool {
        self.config.random_seed.is_some()
    }

    fn random(&self, operation: &str, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        let mut rng = self.rng.lock();
        let response = match operation {
            "random_int" => {
                let input: IntInput = parse_input(operation, inputs)?;
                Value::from(random::int(operation, &mut *rng, input.min, input.max)?)
            }
            "random_choose" => {
                let input: ItemsInput = parse_input(operation, inputs)?;
                random::choose(operation, &mut *rng, &input.items)?
            }
            "random_sample" => {
                let input: SampleInput = parse_input(operation, inputs)?;
                Value::Array(random::sample(operation, &mut *rng, &input.items, input.count)?)
            }
            "random_weighted" => {
                let input: WeightedInput = parse_input(operation, inputs)?;
                random::weighted(operation, &mut *rng, &input.items)?
            }
            _ => {
                let input: ItemsInput = parse_input(operation, inputs)?;
                Value::Array(random::shuffle(&mut *rng, &input.items))
            }
        };
        Ok(ActionOutput::new(response).with_meta("deterministic", self.is_deterministic()))
    }

    fn identifier(&self, operation: &str, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        let max = self.config.max_id_length;
        let id = match operation {
            "id_uuid" => {
                let _: NoInput = parse_input(operation, inputs)?;
                id::uuid_v4(&mut *self.rng.lock())
            }
            "id_nanoid" => {
                let input: NanoidInput = parse_input(operation, inputs)?;
                let length = input.length.unwrap_or(id::NANOID_DEFAULT_LENGTH);
                id::check_length(operation, length, max)?;
                let alphabet: Vec<char> = id::NANOID_ALPHABET.chars().collect();
                id::generate(&mut *self.rng.lock(), &alphabet, length)
            }
            _ => {
                let input: CustomIdInput = parse_input(operation, inputs)?;
                id::check_length(operation, input.length, max)?;
                let alphabet = id::check_alphabet(operation, &input.alphabet)?;
                id::generate(&mut *self.rng.lock(), &alphabet, input.length)
            }
        };
        let length = id.chars().count();
        Ok(ActionOutput::new(id).with_meta("length", length))
    }

    fn math(operation: &str, inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        let result = match operation {
            "math_clamp" => {
                let input: ClampInput = parse_input(operation, inputs)?;
                math::clamp(operation, input.value.0, input.min.0, input.max.0)?
            }
            "math_round" => {
                let input: RoundInput = parse_input(operation, inputs)?;
                math::round(operation, input.value.0, input.decimals)?
            }
            _ => {
                let input: ValuesInput = parse_input(operation, inputs)?;
                let values: Vec<f64> = input.values.iter().map(|n| n.0).collect();
                math::extreme(operation, &values, operation == "math_max")?
            }
        };
        Ok(ActionOutput::new(math::to_value(operation, result)?))
    }

    fn timestamp(inputs: &Inputs) -> Result<ActionOutput, OperationError> {
        const OP: &str = "timestamp";
        let input: TimestampInput = parse_input(OP, inputs)?;
        let format = TimeFormat::parse(OP, input.format.as_deref())?;
        let zone = Zone::parse(OP, input.timezone.as_deref())?;
        let response = time::format_now(Utc::now(), &format, zone);
        Ok(ActionOutput::new(response).with_meta("timezone", zone.name()))
    }

    /// Sleep until the duration elapses or the step is cancelled.
    async fn sleep(inputs: &Inputs, ctx: &ActionContext) -> Result<ActionOutput, OperationError> {
        const OP: &str = "sleep";
        let input: SleepInput = parse_input(OP, inputs)?;
        let duration = match (input.duration.as_deref(), input.milliseconds) {
            (Some(raw), None) => {
                parse_duration(raw).map_err(|m| OperationError::validation(OP, m))?
            }
            (None, Some(ms)) => Duration::from_millis(ms),
            (Some(_), Some(_)) => {
                return Err(OperationError::validation(
                    OP,
                    "give either `duration` or `milliseconds`, not both",
                ));
            }
            (None, None) => {
                return Err(OperationError::validation(
                    OP,
                    "one of `duration` or `milliseconds` is required",
                ));
            }
        };
        if duration > MAX_SLEEP {
            return Err(OperationError::range(
                OP,
                format!(
                    "sleep of {} ms exceeds the {} ms maximum",
                    duration.as_millis(),
                    MAX_SLEEP.as_millis()
                ),
            ));
        }

        debug!(duration_ms = duration.as_millis() as u64, "sleeping");
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = ctx.cancellation.cancelled() => {
                debug!("sleep cancelled");
                return Err(OperationError::cancelled(OP));
            }
        }
        let slept = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Ok(ActionOutput::new(slept).with_meta("slept_ms", slept))
    }
}

impl std::fmt::Debug for UtilityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtilityAction")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BuiltinAction for UtilityAction {
    fn name(&self) -> &str {
        "utility"
    }

    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    async fn execute(
        &self,
        operation: &str,
        inputs: &Inputs,
        ctx: &ActionContext,
    ) -> Result<ActionOutput, OperationError> {
        ctx.check_cancelled(operation)?;
        match operation {
            "random_int" | "random_choose" | "random_sample" | "random_weighted"
            | "random_shuffle" => self.random(operation, inputs),
            "id_uuid" | "id_nanoid" | "id_custom" => self.identifier(operation, inputs),
            "math_clamp" | "math_round" | "math_min" | "math_max" => Self::math(operation, inputs),
            "timestamp" => Self::timestamp(inputs),
            "sleep" => Self::sleep(inputs, ctx).await,
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::json;
    use stepkit_action::ErrorKind;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn inputs(value: Value) -> Inputs {
        match value {
            Value::Object(map) => map,
            _ => Inputs::new(),
        }
    }

    fn seeded(seed: u64) -> UtilityAction {
        UtilityAction::new(&UtilityConfig {
            random_seed: Some(seed),
            ..UtilityConfig::default()
        })
    }

    #[tokio::test]
    async fn unknown_keys_are_validation_errors() {
        let action = seeded(1);
        let err = action
            .execute("random_int", &inputs(json!({"min": 1, "max": 2, "step": 1})), &ActionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("step"));
    }

    #[tokio::test]
    async fn nanoid_defaults_to_21_chars() {
        let out = seeded(1)
            .execute("id_nanoid", &Inputs::new(), &ActionContext::default())
            .await
            .unwrap();
        assert_eq!(out.response.as_str().unwrap().len(), 21);
    }

    #[tokio::test]
    async fn nanoid_respects_configured_maximum() {
        let action = UtilityAction::new(&UtilityConfig {
            random_seed: Some(1),
            max_id_length: 8,
        });
        let err = action
            .execute("id_nanoid", &inputs(json!({"length": 9})), &ActionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[tokio::test]
    async fn sleep_accepts_duration_strings() {
        let started = Instant::now();
        let out = seeded(1)
            .execute("sleep", &inputs(json!({"duration": "20ms"})), &ActionContext::default())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(out.metadata["slept_ms"], 20);
    }

    #[tokio::test]
    async fn sleep_rejects_long_and_ambiguous_requests() {
        let action = seeded(1);
        let ctx = ActionContext::default();
        let too_long = action
            .execute("sleep", &inputs(json!({"duration": "6m"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(too_long.kind, ErrorKind::Range);

        let both = action
            .execute("sleep", &inputs(json!({"duration": "1s", "milliseconds": 5})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(both.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn already_cancelled_context_fails_fast() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ActionContext::default().with_cancellation(token);
        let err = seeded(1)
            .execute("sleep", &inputs(json!({"milliseconds": 10_000})), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn timestamp_reports_zone() {
        let out = seeded(1)
            .execute("timestamp", &inputs(json!({"format": "unix", "timezone": "Europe/Paris"})), &ActionContext::default())
            .await
            .unwrap();
        assert!(out.response.is_i64());
        assert_eq!(out.metadata["timezone"], "Europe/Paris");
    }

    #[tokio::test]
    async fn math_min_and_max() {
        let action = seeded(1);
        let ctx = ActionContext::default();
        let values = inputs(json!({"values": [4, "2.5", 9]}));
        assert_eq!(action.execute("math_min", &values, &ctx).await.unwrap().response, json!(2.5));
        assert_eq!(action.execute("math_max", &values, &ctx).await.unwrap().response, json!(9));
    }
}
