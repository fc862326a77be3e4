use std::time::SystemTime;

use proptest::prelude::*;

use usboor::capture::parse::{parse_slice, parse_with, LengthHeuristic};
use usboor::capture::CaptureSlice;
use usboor::window::aggregate;

/// One whitespace-delimited field with a known contribution to the window.
#[derive(Debug, Clone)]
enum Field {
    Qualifying(u64),
    TooLarge(u64),
    Zero,
    Junk(String),
}

impl Field {
    fn render(&self) -> String {
        match self {
            Field::Qualifying(v) | Field::TooLarge(v) => v.to_string(),
            Field::Zero => "0".to_string(),
            Field::Junk(s) => s.clone(),
        }
    }

    fn contribution(&self) -> u64 {
        match self {
            Field::Qualifying(v) => *v,
            _ => 0,
        }
    }
}

fn field_strategy() -> impl Strategy<Value = Field> {
    prop_oneof![
        (1u64..10_000).prop_map(Field::Qualifying),
        (10_000u64..u64::from(u32::MAX)).prop_map(Field::TooLarge),
        Just(Field::Zero),
        // Hex tags, endpoint addresses, status markers: never purely decimal.
        "[a-z:=-]{1,12}".prop_map(Field::Junk),
    ]
}

fn slice(text: String) -> CaptureSlice {
    CaptureSlice { bus: 1, text }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_window_total_matches_expected_sum(
        lines in prop::collection::vec(
            prop::collection::vec(field_strategy(), 0..8),
            0..30,
        ),
    ) {
        let text = lines
            .iter()
            .map(|line| {
                line.iter()
                    .map(Field::render)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let expected_total: u64 = lines.iter().flatten().map(Field::contribution).sum();
        let expected_packets = lines.iter().filter(|line| !line.is_empty()).count() as u64;

        let sample = aggregate(parse_slice(&slice(text)), SystemTime::UNIX_EPOCH);

        prop_assert_eq!(sample.total_bytes, expected_total);
        prop_assert_eq!(sample.packet_count, expected_packets);
    }

    #[test]
    fn prop_parsing_is_idempotent(text in "[ -~\\n]{0,400}") {
        let s = slice(text);

        let first: Vec<_> = parse_slice(&s).collect();
        let second: Vec<_> = parse_slice(&s).collect();

        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_parser_never_panics_or_overcounts(text in "\\PC*") {
        let s = slice(text);
        let line_count = s.text.lines().count() as u64;

        let sample = aggregate(parse_slice(&s), SystemTime::UNIX_EPOCH);

        prop_assert!(sample.packet_count <= line_count);
    }

    #[test]
    fn prop_custom_policy_bounds_are_exclusive(v in 0u64..20_000) {
        let policy = LengthHeuristic {
            min_exclusive: 100,
            max_exclusive: 1_000,
        };

        let s = slice(v.to_string());
        let total: u64 = parse_with(&s, policy).map(|r| r.byte_length).sum();

        let expected = if v > 100 && v < 1_000 { v } else { 0 };
        prop_assert_eq!(total, expected);
    }
}
