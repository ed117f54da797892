//! A small deterministic parser over the tuple grammar in spec.md §6.
//!
//! The source evaluates payloads with Python's `ast.literal_eval`; this is a
//! bounded nom grammar instead, so malformed input always produces a
//! `ProtocolError` rather than running arbitrary code (spec.md §9 Design
//! Notes, "Dynamic payload parsing").

use nom::character::complete::{char, multispace0};
use nom::multi::separated_list1;
use nom::number::complete::double;
use nom::sequence::delimited;
use nom::IResult;

use crate::vehicle::{AccelerationState, Lane, Specs, StateTuple};

fn ws<'a, F, O>(mut inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    move |input: &'a str| {
        let (input, _) = multispace0(input)?;
        let (input, out) = inner(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, out))
    }
}

/// Parses a parenthesised, comma-separated tuple of decimal literals, e.g.
/// `(50,120,5,5,4)` or `(0, 10.0, 5.0, 1)`.
fn tuple_of_numbers(input: &str) -> IResult<&str, Vec<f64>> {
    delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), ws(double)),
        ws(char(')')),
    )(input)
}

fn finish<'a, T>(result: IResult<&'a str, T>, reason: &str) -> Result<T, String> {
    match result {
        Ok(("", value)) => Ok(value),
        Ok((rest, _)) => Err(format!("{reason}: unexpected trailing input `{rest}`")),
        Err(err) => Err(format!("{reason}: {err}")),
    }
}

/// Casts a parsed field to an enum code, rejecting values that aren't
/// (within floating-point tolerance of) a non-negative integer.
fn as_code(value: f64, field: &str) -> Result<u8, String> {
    if value < 0.0 || value.fract().abs() > 1e-6 || value > u8::MAX as f64 {
        return Err(format!("field `{field}` is not a valid small integer: {value}"));
    }
    Ok(value.round() as u8)
}

pub fn parse_specs(input: &str) -> Result<Specs, String> {
    let values = finish(tuple_of_numbers(input), "specs tuple")?;
    if values.len() != 5 {
        return Err(format!(
            "specs tuple must have exactly 5 fields, got {}",
            values.len()
        ));
    }
    Ok(Specs {
        preferred_speed: values[0],
        max_speed: values[1],
        acceleration: values[2],
        braking_power: values[3],
        size: values[4],
    })
}

pub fn parse_state(input: &str) -> Result<StateTuple, String> {
    let values = finish(tuple_of_numbers(input), "state tuple")?;
    if values.len() != 4 {
        return Err(format!(
            "state tuple must have exactly 4 fields, got {}",
            values.len()
        ));
    }
    let lane_code = as_code(values[0], "lane")?;
    let lane = Lane::from_code(lane_code).ok_or_else(|| format!("unrecognized lane code {lane_code}"))?;
    let accel_code = as_code(values[3], "acceleration_state")?;
    let acceleration_state = AccelerationState::from_code(accel_code)
        .ok_or_else(|| format!("unrecognized acceleration_state code {accel_code}"))?;
    Ok(StateTuple {
        lane,
        distance_taken: values[1],
        speed: values[2],
        acceleration_state,
    })
}

/// Parses a join payload of the form `<specs>|<state>`.
pub fn parse_join_payload(input: &str) -> Result<(Specs, StateTuple), String> {
    let mut parts = input.splitn(2, '|');
    let specs_part = parts.next().ok_or_else(|| "missing specs section".to_string())?;
    let state_part = parts
        .next()
        .ok_or_else(|| "missing `|` separating specs from state".to_string())?;
    let specs = parse_specs(specs_part.trim())?;
    let state = parse_state(state_part.trim())?;
    Ok((specs, state))
}

/// Splits a topic of the form `base/vehicles/<id>/<kind>` into `(id, kind)`.
pub fn split_vehicle_topic(topic: &str) -> Option<(&str, &str)> {
    let mut segments = topic.rsplitn(3, '/');
    let kind = segments.next()?;
    let id = segments.next()?;
    segments.next()?; // the remaining prefix must still contain something
    Some((id, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_specs_tuple() {
        let specs = parse_specs("(50,120,5,5,4)").unwrap();
        assert_eq!(specs.preferred_speed, 50.0);
        assert_eq!(specs.max_speed, 120.0);
        assert_eq!(specs.acceleration, 5.0);
        assert_eq!(specs.braking_power, 5.0);
        assert_eq!(specs.size, 4.0);
        assert!(!specs.is_truck());
    }

    #[test]
    fn parses_state_tuple() {
        let state = parse_state("(0,10,5,1)").unwrap();
        assert_eq!(state.lane, Lane::MergeLane);
        assert_eq!(state.distance_taken, 10.0);
        assert_eq!(state.speed, 5.0);
        assert_eq!(state.acceleration_state, AccelerationState::Accelerating);
    }

    #[test]
    fn parses_join_payload() {
        let (specs, state) = parse_join_payload("(50,120,5,5,4)|(0,0,0,0)").unwrap();
        assert_eq!(specs.preferred_speed, 50.0);
        assert_eq!(state.distance_taken, 0.0);
    }

    #[test]
    fn rejects_malformed_tuple() {
        assert!(parse_specs("(50,120,5,5)").is_err());
        assert!(parse_specs("not a tuple").is_err());
        assert!(parse_state("(9,10,5,1)").is_err(), "lane code 9 is invalid");
        assert!(parse_state("(0,10,5,9)").is_err(), "acceleration_state code 9 is invalid");
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_specs("(50,120,5,5,4) garbage").is_err());
    }

    #[test]
    fn splits_vehicle_topics() {
        assert_eq!(
            split_vehicle_topic("base/vehicles/car-1/state"),
            Some(("car-1", "state"))
        );
        assert_eq!(split_vehicle_topic("base/obituary"), None);
    }
}
