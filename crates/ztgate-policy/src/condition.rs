//! Condition compilation and evaluation
//!
//! Conditions are compiled once when a policy is written: regex patterns,
//! CIDR lists and time windows are parsed up front so evaluation never
//! fails. Unknown fields or operators compile fine and always evaluate to
//! `false`, regardless of `negate`.

use crate::engine::PolicyContext;
use crate::{ConditionField, ConditionValue, Operator, PolicyCondition, PolicyError, PolicyResult};
use ipnetwork::IpNetwork;
use regex::Regex;
use std::net::IpAddr;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A condition with its right-hand side pre-parsed
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    source: PolicyCondition,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Plain,
    Pattern(Regex),
    Networks(Vec<IpNetwork>),
    /// Minute of day; a bare hour matches the whole hour on equality
    Time { minutes: u32, whole_hour: bool },
    TimeRanges(Vec<(u32, u32)>),
}

impl CompiledCondition {
    /// Compile a condition belonging to `policy_id`
    pub fn compile(policy_id: &str, condition: &PolicyCondition) -> PolicyResult<Self> {
        use Operator as Op;

        let matcher = match (condition.field, condition.operator) {
            (ConditionField::Unknown, _) | (_, Op::Unknown) => Matcher::Plain,
            (_, Op::Regex) => match &condition.value {
                ConditionValue::Text(pattern) => Matcher::Pattern(
                    Regex::new(pattern).map_err(|e| {
                        PolicyError::invalid(policy_id, format!("bad regex {pattern:?}: {e}"))
                    })?,
                ),
                other => {
                    return Err(PolicyError::invalid(
                        policy_id,
                        format!("regex operator needs a string pattern, got {other:?}"),
                    ))
                }
            },
            (
                ConditionField::Ip,
                Op::Equals | Op::NotEquals | Op::Contains | Op::NotContains | Op::In | Op::NotIn,
            ) => {
                let networks = condition
                    .value
                    .items()
                    .iter()
                    .map(|v| {
                        v.trim().parse::<IpNetwork>().map_err(|e| {
                            PolicyError::invalid(policy_id, format!("bad address {v:?}: {e}"))
                        })
                    })
                    .collect::<PolicyResult<Vec<_>>>()?;
                Matcher::Networks(networks)
            }
            (ConditionField::TimeOfDay, Op::In | Op::NotIn) => {
                let ranges = condition
                    .value
                    .items()
                    .iter()
                    .map(|v| {
                        parse_range(v).ok_or_else(|| {
                            let message = format!("bad time range {v:?}, expected HH:MM-HH:MM");
                            PolicyError::invalid(policy_id, message)
                        })
                    })
                    .collect::<PolicyResult<Vec<_>>>()?;
                Matcher::TimeRanges(ranges)
            }
            (
                ConditionField::TimeOfDay,
                Op::Equals | Op::NotEquals | Op::GreaterThan | Op::LessThan,
            ) => {
                let parsed = match &condition.value {
                    ConditionValue::Number(h) if (0.0..=24.0).contains(h) => {
                        Some(((*h * 60.0) as u32, h.fract() == 0.0))
                    }
                    ConditionValue::Text(t) => parse_time(t).map(|m| (m, !t.contains(':'))),
                    _ => None,
                };
                let (minutes, whole_hour) = parsed.ok_or_else(|| {
                    let message = format!("bad time {:?}, expected HH:MM or hour", condition.value);
                    PolicyError::invalid(policy_id, message)
                })?;
                Matcher::Time { minutes, whole_hour }
            }
            _ => Matcher::Plain,
        };

        Ok(Self {
            source: condition.clone(),
            matcher,
        })
    }

    /// Source condition
    pub fn source(&self) -> &PolicyCondition {
        &self.source
    }

    /// Evaluate against a context
    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> bool {
        if self.source.field == ConditionField::Unknown
            || self.source.operator == Operator::Unknown
        {
            return false;
        }

        let (operator, inverted) = positive_form(self.source.operator);
        let request = ctx.request;

        let positive = match self.source.field {
            ConditionField::UserId => request
                .user_id
                .as_deref()
                .map(|u| self.text_matches(operator, u))
                .unwrap_or(false),
            ConditionField::Role => request.roles().iter().any(|r| self.text_matches(operator, r)),
            ConditionField::Ip => self.ip_matches(operator, request.ip),
            ConditionField::TimeOfDay => {
                self.time_matches(operator, ctx.clock.minute_of_day(request.timestamp))
            }
            ConditionField::Resource => self.text_matches(operator, &request.resource),
            ConditionField::Action => self.text_matches(operator, &request.action),
            ConditionField::RiskScore => self.number_matches(operator, ctx.risk_score),
            ConditionField::DeviceTrust => self.number_matches(operator, ctx.device_trust),
            ConditionField::Location => request
                .location()
                .map(|l| self.text_matches(operator, l))
                .unwrap_or(false),
            ConditionField::Unknown => false,
        };

        (positive != inverted) != self.source.negate
    }

    fn text_matches(&self, operator: Operator, actual: &str) -> bool {
        let value = &self.source.value;
        match operator {
            Operator::Equals => value.items().iter().any(|v| v == actual),
            Operator::Contains => value.items().iter().any(|v| actual.contains(v.as_str())),
            Operator::In => value.items().iter().any(|v| v == actual),
            Operator::Regex => self.pattern_matches(actual),
            Operator::GreaterThan | Operator::LessThan => actual
                .trim()
                .parse::<f64>()
                .map(|n| self.number_matches(operator, n))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn number_matches(&self, operator: Operator, actual: f64) -> bool {
        let numbers: Vec<f64> = self
            .source
            .value
            .items()
            .iter()
            .filter_map(|v| v.trim().parse::<f64>().ok())
            .collect();

        match operator {
            Operator::Equals | Operator::In => {
                numbers.iter().any(|n| (n - actual).abs() < f64::EPSILON)
            }
            Operator::GreaterThan => numbers.first().map(|n| actual > *n).unwrap_or(false),
            Operator::LessThan => numbers.first().map(|n| actual < *n).unwrap_or(false),
            Operator::Regex => self.pattern_matches(&actual.to_string()),
            _ => false,
        }
    }

    fn ip_matches(&self, operator: Operator, ip: IpAddr) -> bool {
        match (&self.matcher, operator) {
            (Matcher::Networks(nets), Operator::Equals | Operator::Contains | Operator::In) => {
                nets.iter().any(|n| n.contains(ip))
            }
            (_, Operator::Regex) => self.pattern_matches(&ip.to_string()),
            _ => false,
        }
    }

    fn time_matches(&self, operator: Operator, minute_of_day: u32) -> bool {
        match (&self.matcher, operator) {
            (&Matcher::Time { minutes, whole_hour }, Operator::Equals) => {
                if whole_hour {
                    minute_of_day / 60 == minutes / 60
                } else {
                    minute_of_day == minutes
                }
            }
            (&Matcher::Time { minutes, .. }, Operator::GreaterThan) => minute_of_day > minutes,
            (&Matcher::Time { minutes, .. }, Operator::LessThan) => minute_of_day < minutes,
            (Matcher::TimeRanges(ranges), Operator::In) => {
                ranges.iter().any(|(start, end)| in_range(minute_of_day, *start, *end))
            }
            (_, Operator::Regex) => {
                let clock = format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60);
                self.pattern_matches(&clock)
            }
            _ => false,
        }
    }

    fn pattern_matches(&self, actual: &str) -> bool {
        match &self.matcher {
            Matcher::Pattern(re) => re.is_match(actual),
            _ => false,
        }
    }
}

/// Map negative operators onto their positive counterpart
fn positive_form(operator: Operator) -> (Operator, bool) {
    match operator {
        Operator::NotEquals => (Operator::Equals, true),
        Operator::NotContains => (Operator::Contains, true),
        Operator::NotIn => (Operator::In, true),
        other => (other, false),
    }
}

/// `HH:MM` or bare hour into minutes since midnight
fn parse_time(value: &str) -> Option<u32> {
    let value = value.trim();
    let (hours, minutes) = match value.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (value.parse::<u32>().ok()?, 0),
    };
    if minutes >= 60 {
        return None;
    }
    let total = hours.checked_mul(60)?.checked_add(minutes)?;
    (total <= MINUTES_PER_DAY).then_some(total)
}

fn parse_range(value: &str) -> Option<(u32, u32)> {
    let (start, end) = value.split_once('-')?;
    Some((parse_time(start)?, parse_time(end)?))
}

/// Half-open window, wrapping past midnight when `start > end`
fn in_range(minute: u32, start: u32, end: u32) -> bool {
    if start <= end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}
