use proptest::prelude::*;
use signet_path::codec::{decode, encode, DecodeError};
use signet_path::{CommandKind, Path, PathCommand, Point};

fn coord_strategy() -> impl Strategy<Value = f32> {
    prop_oneof![
        -10_000.0f32..10_000.0f32,
        proptest::num::f32::NORMAL | proptest::num::f32::SUBNORMAL | proptest::num::f32::ZERO,
    ]
}

fn point_strategy() -> impl Strategy<Value = Point> {
    (coord_strategy(), coord_strategy()).prop_map(|(x, y)| Point::new(x, y))
}

fn command_strategy() -> impl Strategy<Value = PathCommand> {
    prop_oneof![
        point_strategy().prop_map(PathCommand::MoveTo),
        point_strategy().prop_map(PathCommand::LineTo),
        (point_strategy(), point_strategy())
            .prop_map(|(point, control)| PathCommand::QuadCurveTo { point, control }),
        (point_strategy(), point_strategy(), point_strategy()).prop_map(
            |(point, control1, control2)| PathCommand::CubicCurveTo {
                point,
                control1,
                control2,
            }
        ),
        Just(PathCommand::ClosePath),
    ]
}

fn path_strategy() -> impl Strategy<Value = Path> {
    prop::collection::vec(command_strategy(), 0..64).prop_map(Path::from)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn round_trip_is_identity(path in path_strategy()) {
        let bytes = encode(&path);
        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &path);
        prop_assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn truncation_inside_last_command_is_rejected(
        path in prop::collection::vec(command_strategy(), 1..16).prop_map(Path::from),
        frac in 0.0f64..1.0,
    ) {
        let bytes = encode(&path);
        let last = path.commands()[path.len() - 1];
        let last_len = signet_path::codec::encoded_command_len(last.kind());
        let start = bytes.len() - last_len;
        // Cut strictly inside the last command: start+1 ..= len-1.
        let cut = start + 1 + ((last_len - 1) as f64 * frac) as usize;
        prop_assume!(cut < bytes.len());
        let is_truncated = matches!(decode(&bytes[..cut]), Err(DecodeError::TruncatedInput { .. }));
        prop_assert!(is_truncated);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        // Either a clean decode or a typed error; re-encoding a success is stable.
        if let Ok(path) = decode(&bytes) {
            prop_assert_eq!(encode(&path).len(), bytes.len());
        }
    }

    #[test]
    fn unknown_tags_are_rejected(tag in any::<i32>(), path in path_strategy()) {
        prop_assume!(CommandKind::from_tag(tag).is_none());
        prop_assume!(!path.is_empty());
        let mut bytes = encode(&path);
        bytes[0..4].copy_from_slice(&tag.to_le_bytes());
        prop_assert_eq!(decode(&bytes), Err(DecodeError::UnknownTag { offset: 0, tag }));
    }
}
