use crate::server::{PricingParams, validate_params};
use crate::types::{Hotel, Period, RateQuery, Room};

fn params(period: Option<&str>, hotel: Option<&str>, room: Option<&str>) -> PricingParams {
    PricingParams {
        period: period.map(str::to_string),
        hotel: hotel.map(str::to_string),
        room: room.map(str::to_string),
    }
}

#[test]
fn test_valid_params_build_a_query() {
    let query = validate_params(&params(
        Some("Summer"),
        Some("FloatingPointResort"),
        Some("SingletonRoom"),
    ))
    .unwrap();
    assert_eq!(
        query,
        RateQuery::new(
            Period::Summer,
            Hotel::FloatingPointResort,
            Room::SingletonRoom
        )
    );
}

#[test]
fn test_invalid_period_gets_its_own_message() {
    let errors = validate_params(&params(
        Some("summer-2024"),
        Some("FloatingPointResort"),
        Some("SingletonRoom"),
    ))
    .unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors["period"],
        vec!["The period field must be one of: Summer, Autumn, Winter, Spring.".to_string()]
    );
}

#[test]
fn test_each_bad_field_is_reported() {
    let errors = validate_params(&params(Some("Mondays"), Some("Ritz"), None)).unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(errors.contains_key("period"));
    assert!(errors.contains_key("hotel"));
    assert!(errors.contains_key("room"));
}

#[test]
fn test_missing_field_reads_like_invalid_value() {
    let errors = validate_params(&params(
        None,
        Some("FloatingPointResort"),
        Some("SingletonRoom"),
    ))
    .unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors["period"],
        vec!["The period field must be one of: Summer, Autumn, Winter, Spring.".to_string()]
    );
}

#[test]
fn test_problem_document_omits_empty_errors() {
    use crate::server::ProblemDetails;

    let problem = ProblemDetails {
        kind: "https://tools.ietf.org/html/rfc7231#section-6.6.4".to_string(),
        title: "Service Temporarily Unavailable".to_string(),
        instance: "/pricing".to_string(),
        trace_id: "abc123".to_string(),
        errors: None,
    };
    let json = serde_json::to_value(&problem).unwrap();
    assert_eq!(json["type"], "https://tools.ietf.org/html/rfc7231#section-6.6.4");
    assert_eq!(json["traceId"], "abc123");
    assert!(json.get("errors").is_none());
}
