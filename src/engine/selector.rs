//! Engine candidate ordering
//!
//! Pure function of the classified format and the engines available for it.
//! Candidates are attempted strictly in the returned order, one at a time.

use std::collections::HashSet;

use super::EngineName;
use crate::streaming::classification::StreamFormat;

/// Preference order before availability filtering
fn preference(format: StreamFormat) -> &'static [EngineName] {
    match format {
        StreamFormat::AdaptiveHls | StreamFormat::Indirect => &[EngineName::Hls, EngineName::Native],
        StreamFormat::AdaptiveDash => &[EngineName::Dash, EngineName::Hls, EngineName::Native],
        StreamFormat::Progressive(_) | StreamFormat::Unknown | StreamFormat::ScriptEndpoint => {
            &[EngineName::Native]
        }
        StreamFormat::PushStream => &[],
    }
}

/// Ordered candidate engines for `format`, most preferred first.
/// An empty result means the format cannot be played here.
pub fn select_order(format: StreamFormat, available: &HashSet<EngineName>) -> Vec<EngineName> {
    preference(format)
        .iter()
        .copied()
        .filter(|engine| available.contains(engine))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::classification::ProgressiveContainer;
    use rstest::rstest;

    fn set(engines: &[EngineName]) -> HashSet<EngineName> {
        engines.iter().copied().collect()
    }

    #[rstest]
    #[case(StreamFormat::AdaptiveHls, &[EngineName::Native], &[EngineName::Native])]
    #[case(
        StreamFormat::AdaptiveHls,
        &[EngineName::Native, EngineName::Hls],
        &[EngineName::Hls, EngineName::Native]
    )]
    #[case(StreamFormat::AdaptiveHls, &[], &[])]
    #[case(
        StreamFormat::Indirect,
        &[EngineName::Hls, EngineName::Dash, EngineName::Native],
        &[EngineName::Hls, EngineName::Native]
    )]
    #[case(
        StreamFormat::AdaptiveDash,
        &[EngineName::Native, EngineName::Dash],
        &[EngineName::Dash, EngineName::Native]
    )]
    #[case(StreamFormat::AdaptiveDash, &[EngineName::Hls], &[EngineName::Hls])]
    #[case(
        StreamFormat::Progressive(ProgressiveContainer::Mp4),
        &[EngineName::Hls, EngineName::Native],
        &[EngineName::Native]
    )]
    #[case(StreamFormat::Unknown, &[EngineName::Hls], &[])]
    #[case(
        StreamFormat::PushStream,
        &[EngineName::Hls, EngineName::Dash, EngineName::Native],
        &[]
    )]
    fn test_select_order(
        #[case] format: StreamFormat,
        #[case] available: &[EngineName],
        #[case] expected: &[EngineName],
    ) {
        assert_eq!(select_order(format, &set(available)), expected.to_vec());
    }

    #[test]
    fn test_select_order_is_deterministic() {
        let available = set(&[EngineName::Native, EngineName::Dash, EngineName::Hls]);
        let first = select_order(StreamFormat::AdaptiveDash, &available);
        for _ in 0..10 {
            assert_eq!(select_order(StreamFormat::AdaptiveDash, &available), first);
        }
    }
}
