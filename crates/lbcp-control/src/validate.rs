//! Input validation for control plane commands.
//!
//! Validation turns raw request values into stored types and reports the
//! first problem as [`ControlError::InvalidArgument`].

use std::collections::HashSet;
use std::str::FromStr;

use lbcp_core::{validate_zone_name, InstanceId};
use lbcp_store::{HealthCheck, Listener, LoadBalancer, Protocol};

use crate::error::{ControlError, Result};
use crate::types::{ConfigureHealthCheckRequest, ControlConfig, ListenerSpec};

/// Allowed health check interval in seconds.
pub const INTERVAL_RANGE: std::ops::RangeInclusive<u32> = 5..=300;

/// Allowed health check timeout in seconds.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 2..=60;

/// Allowed healthy and unhealthy thresholds.
pub const THRESHOLD_RANGE: std::ops::RangeInclusive<u32> = 2..=10;

fn invalid(msg: impl Into<String>) -> ControlError {
    ControlError::InvalidArgument(msg.into())
}

fn port(value: u32, field: &str) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| invalid(format!("{field} must be between 1 and 65535, got {value}")))
}

fn protocol(value: &str) -> Result<Protocol> {
    Protocol::from_str(value).map_err(|e| invalid(e.to_string()))
}

/// Convert listener specs into listeners.
///
/// # Errors
///
/// Returns `InvalidArgument` for an unknown protocol, an out-of-range port,
/// or a load balancer port repeated within the request.
pub fn listeners(specs: &[ListenerSpec]) -> Result<Vec<Listener>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(specs.len());

    for spec in specs {
        let listener = Listener {
            load_balancer_port: port(spec.load_balancer_port, "LoadBalancerPort")?,
            protocol: protocol(&spec.protocol)?,
            instance_protocol: spec.instance_protocol.as_deref().map(protocol).transpose()?,
            instance_port: port(spec.instance_port, "InstancePort")?,
            certificate_id: spec.certificate_id.clone(),
        };
        if !seen.insert(listener.load_balancer_port) {
            return Err(invalid(format!(
                "duplicate listener port {} in request",
                listener.load_balancer_port
            )));
        }
        out.push(listener);
    }

    Ok(out)
}

/// Select the requested listeners that are not yet on the balancer.
///
/// A listener identical to an existing one is skipped.
///
/// # Errors
///
/// Returns `InvalidArgument` if a requested port is bound to a different
/// listener.
pub fn new_listeners(lb: &LoadBalancer, requested: Vec<Listener>) -> Result<Vec<Listener>> {
    let mut out = Vec::with_capacity(requested.len());
    for listener in requested {
        match lb.listener(listener.load_balancer_port) {
            Some(existing) if *existing == listener => {}
            Some(_) => {
                return Err(invalid(format!(
                    "a listener already exists on port {} with a different configuration",
                    listener.load_balancer_port
                )))
            }
            None => out.push(listener),
        }
    }
    Ok(out)
}

/// Convert listener port numbers for deletion.
///
/// # Errors
///
/// Returns `InvalidArgument` for an out-of-range port.
pub fn ports(values: &[u32]) -> Result<Vec<u16>> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let p = port(*value, "LoadBalancerPort")?;
        if !out.contains(&p) {
            out.push(p);
        }
    }
    Ok(out)
}

/// Validate zone names, removing duplicates while keeping request order.
///
/// # Errors
///
/// Returns `InvalidArgument` for a malformed zone or one outside the
/// configured set.
pub fn zones(config: &ControlConfig, requested: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(requested.len());
    for zone in requested {
        validate_zone_name(zone)?;
        if !config.is_available_zone(zone) {
            return Err(invalid(format!("unknown availability zone: {zone}")));
        }
        if !out.contains(zone) {
            out.push(zone.clone());
        }
    }
    Ok(out)
}

/// Parse instance ids, removing duplicates while keeping request order.
///
/// # Errors
///
/// Returns `InvalidArgument` for a malformed id.
pub fn instance_ids(raw: &[String]) -> Result<Vec<InstanceId>> {
    let mut out: Vec<InstanceId> = Vec::with_capacity(raw.len());
    for id in raw {
        let id: InstanceId = id.parse()?;
        if !out.contains(&id) {
            out.push(id);
        }
    }
    Ok(out)
}

/// Validate a health check configuration request.
///
/// Fields are checked for presence in a fixed order so the same request
/// always reports the same missing field.
///
/// # Errors
///
/// Returns `InvalidArgument` naming the first missing or invalid field.
pub fn health_check(req: &ConfigureHealthCheckRequest) -> Result<HealthCheck> {
    let healthy_threshold = req
        .healthy_threshold
        .ok_or_else(|| invalid("Healthy Threshold must be specified"))?;
    let interval = req
        .interval
        .ok_or_else(|| invalid("Interval must be specified"))?;
    let target = req
        .target
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| invalid("Target must be specified"))?;
    let timeout = req
        .timeout
        .ok_or_else(|| invalid("Timeout must be specified"))?;
    let unhealthy_threshold = req
        .unhealthy_threshold
        .ok_or_else(|| invalid("Unhealthy Threshold must be specified"))?;

    if !INTERVAL_RANGE.contains(&interval) {
        return Err(invalid(format!(
            "Interval must be between {} and {} seconds",
            INTERVAL_RANGE.start(),
            INTERVAL_RANGE.end()
        )));
    }
    if !TIMEOUT_RANGE.contains(&timeout) {
        return Err(invalid(format!(
            "Timeout must be between {} and {} seconds",
            TIMEOUT_RANGE.start(),
            TIMEOUT_RANGE.end()
        )));
    }
    if timeout >= interval {
        return Err(invalid("Timeout must be less than Interval"));
    }
    for (field, value) in [
        ("Healthy Threshold", healthy_threshold),
        ("Unhealthy Threshold", unhealthy_threshold),
    ] {
        if !THRESHOLD_RANGE.contains(&value) {
            return Err(invalid(format!(
                "{field} must be between {} and {}",
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            )));
        }
    }
    health_check_target(target)?;

    Ok(HealthCheck {
        interval_seconds: interval,
        target: target.to_string(),
        timeout_seconds: timeout,
        healthy_threshold,
        unhealthy_threshold,
    })
}

/// Validate a probe target such as `TCP:80` or `HTTP:80/health`.
///
/// # Errors
///
/// Returns `InvalidArgument` if the target is malformed.
pub fn health_check_target(target: &str) -> Result<()> {
    let malformed = || invalid(format!("invalid health check target: {target}"));

    let (scheme, rest) = target.split_once(':').ok_or_else(malformed)?;
    let scheme = protocol(scheme).map_err(|_| malformed())?;

    let port_str = match scheme {
        Protocol::Tcp | Protocol::Ssl => rest,
        Protocol::Http | Protocol::Https => {
            let slash = rest.find('/').ok_or_else(malformed)?;
            &rest[..slash]
        }
    };

    let value: u32 = port_str.parse().map_err(|_| malformed())?;
    port(value, "Target port")?;
    Ok(())
}
