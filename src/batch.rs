// Batch-size resolver
//
// PPO-style trainers need the minibatch size to evenly divide the rollout
// buffer (n_steps * num_envs). The config editor constrains its numeric input
// to the divisors computed here and defaults to the largest one.

use serde_json::Value;

use crate::errors::{DashboardError, Result};

/// Largest rollout buffer we are willing to enumerate divisors for
pub const MAX_ROLLOUT_TOTAL: u64 = 1 << 40;

/// Every divisor of `n_steps * num_envs`, ascending
pub fn resolve(n_steps: u64, num_envs: u64) -> Result<Vec<u64>> {
    if n_steps == 0 || num_envs == 0 {
        return Err(DashboardError::InvalidArgument(format!(
            "n_steps and num_envs must be positive (got {} and {})",
            n_steps, num_envs
        )));
    }

    let total = n_steps
        .checked_mul(num_envs)
        .filter(|total| *total <= MAX_ROLLOUT_TOTAL)
        .ok_or_else(|| {
            DashboardError::InvalidArgument(format!(
                "n_steps * num_envs exceeds {}",
                MAX_ROLLOUT_TOTAL
            ))
        })?;

    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut i = 1u64;
    while i * i <= total {
        if total % i == 0 {
            small.push(i);
            if i != total / i {
                large.push(total / i);
            }
        }
        i += 1;
    }

    small.extend(large.into_iter().rev());
    Ok(small)
}

/// The selection the editor falls back to when the user has not chosen one
pub fn default_batch_size(sizes: &[u64]) -> Option<u64> {
    sizes.last().copied()
}

/// Resolve from loosely typed input (JSON numbers or numeric strings)
pub fn resolve_values(n_steps: &Value, num_envs: &Value) -> Result<Vec<u64>> {
    let n_steps = positive_integer("n_steps", n_steps)?;
    let num_envs = positive_integer("num_envs", num_envs)?;
    resolve(n_steps, num_envs)
}

/// Parse a positive integer out of a JSON value.
///
/// Accepts integral numbers (`2048`, `2048.0`) and trimmed numeric strings
/// (`"2048"`), since HTML form inputs arrive as strings.
pub fn positive_integer(field: &str, value: &Value) -> Result<u64> {
    let invalid = || {
        DashboardError::InvalidArgument(format!(
            "{} must be a positive integer (got {})",
            field, value
        ))
    };

    let parsed = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }
        }
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) if n > 0 => Ok(n),
        _ => Err(invalid()),
    }
}
