use crate::options::guiding::FlipState;

/// Raw `FlipStatus` values as reported by `RemoteMountStatusGetInfo`,
/// remapped per the mapping table: 0/1 before a flip, 2/3 after, 4 fork
/// (disables all flip logic), 5 an error.
pub fn map_flip_status(raw: i64) -> FlipState {
    match raw {
        0 | 1 => FlipState::Before,
        2 | 3 => FlipState::After,
        4 => FlipState::Fork,
        5 => FlipState::Error,
        _ => FlipState::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_before_and_after_ranges() {
        assert_eq!(map_flip_status(0), FlipState::Before);
        assert_eq!(map_flip_status(1), FlipState::Before);
        assert_eq!(map_flip_status(2), FlipState::After);
        assert_eq!(map_flip_status(3), FlipState::After);
        assert_eq!(map_flip_status(4), FlipState::Fork);
        assert_eq!(map_flip_status(5), FlipState::Error);
        assert_eq!(map_flip_status(99), FlipState::Error);
    }
}
