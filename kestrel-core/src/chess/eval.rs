//! Material evaluation used to bootstrap search values early in training.

use shakmaty::{Chess, Position, Role};

use kestrel_util::math::clamp_unit;

const PIECE_VALUES: [(Role, i32); 5] = [
    (Role::Pawn, 100),
    (Role::Knight, 300),
    (Role::Bishop, 320),
    (Role::Rook, 500),
    (Role::Queen, 900),
];

/// Material balance in centipawns from the side to move's point of view.
pub fn material_eval(pos: &Chess) -> i32 {
    let board = pos.board();
    let us = pos.turn();

    let mut score = 0;
    for &(role, value) in &PIECE_VALUES {
        let pieces = board.by_role(role);
        let ours = (pieces & board.by_color(us)).count() as i32;
        let theirs = (pieces & board.by_color(!us)).count() as i32;
        score += (ours - theirs) * value;
    }
    score
}

/// `material_eval` scaled by `window` and clamped to `[-1, 1]`.
pub fn bootstrap_value(pos: &Chess, window: f32) -> f32 {
    clamp_unit(material_eval(pos) as f32 / window)
}

#[cfg(test)]
mod tests {
    use shakmaty::fen::Fen;
    use shakmaty::{CastlingMode, Chess};

    use super::*;

    #[test]
    fn startpos_is_balanced() {
        assert_eq!(material_eval(&Chess::default()), 0);
    }

    #[test]
    fn eval_is_relative_to_side_to_move() {
        // white is up a queen
        let white: Chess = "rnb1kbnr/pppp1ppp/8/4p3/5PP1/8/PPPPP2P/RNBQKBNR w KQkq - 0 3"
            .parse::<Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();
        let black: Chess = "rnb1kbnr/pppp1ppp/8/4p3/5PP1/8/PPPPP2P/RNBQKBNR b KQkq - 0 3"
            .parse::<Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();

        assert_eq!(material_eval(&white), 900);
        assert_eq!(material_eval(&black), -900);
    }

    #[test]
    fn bootstrap_is_clamped() {
        let pos: Chess = "rnb1kbnr/pppp1ppp/8/4p3/5PP1/8/PPPPP2P/RNBQKBNR w KQkq - 0 3"
            .parse::<Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();

        assert_eq!(bootstrap_value(&pos, 450.0), 1.0);
        assert_eq!(bootstrap_value(&pos, 1800.0), 0.5);
    }
}
