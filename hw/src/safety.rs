//! Goal position clamping

use tracing::{debug, warn};

use crate::{DeviceError, MotorMap};

/// Clamp each goal to within `max_relative_target` of the present position
///
/// `goals` and `present` are keyed by motor name. Every goal motor must have a
/// present reading. Clamped motors are logged at warn level.
pub fn ensure_safe_goal_position(
    device: &str,
    goals: &MotorMap,
    present: &MotorMap,
    max_relative_target: f64,
) -> Result<MotorMap, DeviceError> {
    debug!(%device, goal_count = goals.len(), max_relative_target, "ensure_safe_goal_position: called");
    let limit = max_relative_target.abs();
    let mut safe = MotorMap::new();

    for (motor, &goal) in goals {
        let Some(&current) = present.get(motor) else {
            return Err(DeviceError::UnknownMotor {
                device: device.to_string(),
                motor: motor.clone(),
            });
        };

        let clamped = goal.clamp(current - limit, current + limit);
        if clamped != goal {
            warn!(
                %device,
                %motor,
                requested = goal,
                applied = clamped,
                "Relative goal position magnitude had to be clamped"
            );
        }
        safe.insert(motor.clone(), clamped);
    }

    Ok(safe)
}
