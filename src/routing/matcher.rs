use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use tracing::{debug, info};

use crate::routing::{RouteConditions, RouteResult, RouteRule, RouteTarget, RoutingDecision};
use crate::store::{PhoneNumberAssignment, RuleStore, SubscriberStore};

/// Main routing function
///
/// Decides which party should receive an inbound call against
/// `phone_number_id`:
/// 1. Fetch enabled rules ordered ascending by priority
/// 2. Evaluate each rule's conditions against the caller number and `now`
/// 3. Resolve the first matching rule's target; an unresolvable target
///    (suspended user, no extension) skips to the next rule
/// 4. Fall back to the phone number's direct user assignment
pub async fn evaluate(
    rules: &dyn RuleStore,
    subscribers: &dyn SubscriberStore,
    phone_number_id: &str,
    caller_number: &str,
    now: DateTime<Utc>,
) -> Result<RouteResult> {
    let candidates = rules.list_enabled_rules(phone_number_id).await?;
    debug!(
        "routing {} -> number {}: {} candidate rules",
        caller_number,
        phone_number_id,
        candidates.len()
    );

    for rule in &candidates {
        if !rule.enabled {
            continue;
        }
        if !matches_conditions(&rule.conditions, caller_number, &now)? {
            continue;
        }

        match &rule.target {
            RouteTarget::User { user_id } => {
                match resolve_user_target(subscribers, user_id).await? {
                    Some(decision) => {
                        info!(
                            "rule '{}' matched, delivering to {} ext {}",
                            rule.name, decision.party, decision.extension
                        );
                        return Ok(RouteResult::Deliver(decision));
                    }
                    None => {
                        // Matched but unusable: keep evaluating so a
                        // catch-all behind a suspended target still rings.
                        debug!("rule '{}' target {} not routable, skipping", rule.name, user_id);
                        continue;
                    }
                }
            }
        }
    }

    // No rule produced a decision; try the number's direct assignment.
    if let Some(PhoneNumberAssignment::User { user_id }) =
        subscribers.get_phone_number(phone_number_id).await?
    {
        if let Some(decision) = resolve_user_target(subscribers, &user_id).await? {
            info!(
                "direct assignment of number {}, delivering to {} ext {}",
                phone_number_id, decision.party, decision.extension
            );
            return Ok(RouteResult::Deliver(decision));
        }
    }

    info!(
        "no route for {} -> number {}",
        caller_number, phone_number_id
    );
    Ok(RouteResult::NoRoute)
}

async fn resolve_user_target(
    subscribers: &dyn SubscriberStore,
    user_id: &str,
) -> Result<Option<RoutingDecision>> {
    let user = match subscribers.get_user(user_id).await? {
        Some(user) => user,
        None => return Ok(None),
    };
    Ok(user.routable_extension().map(|extension| RoutingDecision {
        party: user_id.to_string(),
        extension: extension.to_string(),
    }))
}

/// Check if all present condition categories match (logical AND).
fn matches_conditions(
    conditions: &RouteConditions,
    caller_number: &str,
    now: &DateTime<Utc>,
) -> Result<bool> {
    if !conditions.caller_patterns.is_empty() {
        let mut matched = false;
        for pattern in &conditions.caller_patterns {
            if matches_caller_pattern(pattern, caller_number)? {
                matched = true;
                break;
            }
        }
        if !matched {
            return Ok(false);
        }
    }

    if !conditions.days_of_week.is_empty() {
        let weekday = now.weekday().num_days_from_sunday() as u8;
        if !conditions.days_of_week.contains(&weekday) {
            return Ok(false);
        }
    }

    if !conditions.time_ranges.is_empty() {
        let clock = now.format("%H:%M").to_string();
        // Inclusive on both ends, lexicographic. start > end never matches.
        let in_range = conditions
            .time_ranges
            .iter()
            .any(|range| range.start.as_str() <= clock.as_str() && clock.as_str() <= range.end.as_str());
        if !in_range {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Match a caller number against a pattern. Plain strings match exactly;
/// `*` matches any substring, compiled start-to-end.
fn matches_caller_pattern(pattern: &str, caller_number: &str) -> Result<bool> {
    if !pattern.contains('*') {
        return Ok(pattern == caller_number);
    }

    let regex_src = format!("^{}$", regex::escape(pattern).replace("\\*", ".*"));
    let regex = Regex::new(&regex_src)
        .map_err(|e| anyhow!("Invalid caller pattern '{}': {}", pattern, e))?;
    Ok(regex.is_match(caller_number))
}
