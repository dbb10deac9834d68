//! Chess environment: a `shakmaty` position behind the [Env] contract.

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position, Role};
use thiserror::Error;

use crate::env::{Env, NotTerminal, TerminalState};

pub mod codec;
pub mod eval;
pub mod input;

pub use codec::POLICY_SIZE;
pub use input::{FEATURES, HEIGHT, OBS_SIZE, WIDTH};

#[derive(Debug, Error)]
pub enum FenError {
    #[error("invalid FEN: {0}")]
    Parse(#[from] shakmaty::fen::ParseFenError),
    #[error("illegal position: {0}")]
    Position(String),
}

/// Chess environment with a move history stack.
///
/// `push`/`pop` are balanced: a `pop` restores the exact prior state,
/// including the repetition and halfmove history.
#[derive(Debug, Clone)]
pub struct ChessEnv {
    pos: Chess,
    start: Chess,
    /// Position before each played move, paired with the move itself.
    history: Vec<(Chess, Move)>,
    /// Zobrist keys of every position seen so far, the current one last.
    hashes: Vec<Zobrist64>,
    actions: Vec<usize>,
    moves: Vec<Move>,
    actions_fresh: bool,
}

impl Default for ChessEnv {
    fn default() -> Self {
        Self::from_position(Chess::default())
    }
}

impl ChessEnv {
    fn from_position(pos: Chess) -> Self {
        let hash = pos.zobrist_hash(EnPassantMode::Legal);
        ChessEnv {
            start: pos.clone(),
            pos,
            history: vec![],
            hashes: vec![hash],
            actions: vec![],
            moves: vec![],
            actions_fresh: false,
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let pos = fen
            .parse::<Fen>()?
            .into_position(CastlingMode::Standard)
            .map_err(|e| FenError::Position(e.to_string()))?;
        Ok(Self::from_position(pos))
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn position(&self) -> &Chess {
        &self.pos
    }

    /// How often the current position has occurred, counting itself.
    pub fn repetition_count(&self) -> usize {
        let current = *self.hashes.last().unwrap();
        self.hashes.iter().filter(|&&h| h == current).count()
    }

    fn refresh_actions(&mut self) {
        if !self.actions_fresh {
            self.moves = self.pos.legal_moves().to_vec();
            self.actions = self
                .moves
                .iter()
                .map(|m| codec::move_to_action(&self.pos, m))
                .collect();
            self.actions_fresh = true;
        }
    }

    fn insufficient_material(&self) -> bool {
        let board = self.pos.board();

        let kings = board.by_role(Role::King);
        let knights = board.by_role(Role::Knight);
        let bishops = board.by_role(Role::Bishop);
        let occupied = board.occupied();
        let white = board.by_color(Color::White);
        let black = board.by_color(Color::Black);

        // K vs K
        if occupied == kings {
            return true;
        }

        // K vs KB, or KB vs KB with one bishop each
        if occupied == (kings | bishops) {
            return bishops.count() == 1 || (white.count() == black.count() && bishops.count() == 2);
        }

        // K vs KN, or KN vs KN with one knight each
        if occupied == (kings | knights) {
            return knights.count() == 1 || (white.count() == black.count() && knights.count() == 2);
        }

        false
    }
}

impl Env for ChessEnv {
    fn turn(&self) -> f32 {
        match self.pos.turn() {
            Color::White => 1.0,
            Color::Black => -1.0,
        }
    }

    fn ply(&self) -> usize {
        self.history.len()
    }

    fn policy_len(&self) -> usize {
        POLICY_SIZE
    }

    fn obs_len(&self) -> usize {
        OBS_SIZE
    }

    fn actions(&mut self) -> &[usize] {
        self.refresh_actions();
        &self.actions
    }

    fn observe(&self, out: &mut [f32]) {
        input::encode_observation(&self.pos, self.ply(), out);
    }

    fn push(&mut self, action: usize) {
        self.refresh_actions();
        let index = self
            .actions
            .iter()
            .position(|&a| a == action)
            .unwrap_or_else(|| panic!("action {} is not legal in {}", action, self.fen()));
        let m = self.moves[index].clone();

        self.history.push((self.pos.clone(), m.clone()));
        self.pos.play_unchecked(&m);
        self.hashes.push(self.pos.zobrist_hash(EnPassantMode::Legal));
        self.actions_fresh = false;
    }

    fn pop(&mut self) {
        let (pos, _) = self.history.pop().expect("pop without a matching push");
        self.pos = pos;
        self.hashes.pop();
        self.actions_fresh = false;
    }

    fn terminal(&mut self) -> Option<TerminalState> {
        if self.pos.halfmoves() >= 50 {
            return Some(TerminalState {
                value: 0.0,
                reason: "Draw by 50-move rule",
            });
        }

        if self.repetition_count() >= 3 {
            return Some(TerminalState {
                value: 0.0,
                reason: "Draw by threefold repetition",
            });
        }

        if self.insufficient_material() {
            return Some(TerminalState {
                value: 0.0,
                reason: "Draw by insufficient material",
            });
        }

        if !self.actions().is_empty() {
            return None;
        }

        if self.pos.is_check() {
            Some(match self.pos.turn() {
                Color::White => TerminalState {
                    value: -1.0,
                    reason: "White is checkmated",
                },
                Color::Black => TerminalState {
                    value: 1.0,
                    reason: "Black is checkmated",
                },
            })
        } else {
            Some(TerminalState {
                value: 0.0,
                reason: match self.pos.turn() {
                    Color::White => "White is stalemated",
                    Color::Black => "Black is stalemated",
                },
            })
        }
    }

    fn bootstrap_value(&self, window: f32) -> f32 {
        eval::bootstrap_value(&self.pos, window)
    }

    fn pgn(&mut self) -> Result<String, NotTerminal> {
        let term = self.terminal().ok_or(NotTerminal)?;

        let result = if term.value < 0.0 {
            "0-1"
        } else if term.value > 0.0 {
            "1-0"
        } else {
            "1/2-1/2"
        };

        let mut board = self.start.clone();
        let mut move_number = 1;
        let mut out = String::new();

        for (_, m) in &self.history {
            if board.turn() == Color::White {
                if move_number > 1 {
                    out.push(' ');
                }
                out.push_str(&format!("{}.", move_number));
            } else {
                move_number += 1;
            }

            let san = SanPlus::from_move_and_play_unchecked(&mut board, m);
            out.push_str(&format!(" {}", san));
        }

        Ok(format!("{} {} {{{}}}", out.trim_start(), result, term.reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_restores_state() {
        let mut env = ChessEnv::default();
        let before_fen = env.fen();
        let before_actions = env.actions().to_vec();
        let before_reps = env.repetition_count();
        let mut before_obs = vec![0.0; OBS_SIZE];
        env.observe(&mut before_obs);

        let action = env.actions()[0];
        env.push(action);
        env.pop();

        assert_eq!(env.fen(), before_fen);
        assert_eq!(env.actions(), &before_actions[..]);
        assert_eq!(env.repetition_count(), before_reps);
        assert_eq!(env.ply(), 0);

        let mut after_obs = vec![1.0; OBS_SIZE];
        env.observe(&mut after_obs);
        assert_eq!(after_obs, before_obs);
    }

    #[test]
    fn checkmate_is_terminal() {
        // fool's mate
        let mut env = ChessEnv::from_fen(
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
        )
        .unwrap();
        let term = env.terminal().unwrap();
        assert_eq!(term.value, -1.0);
        assert_eq!(term.reason, "White is checkmated");
    }

    #[test]
    fn stalemate_is_terminal() {
        let mut env = ChessEnv::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let term = env.terminal().unwrap();
        assert_eq!(term.value, 0.0);
        assert_eq!(term.reason, "Black is stalemated");
    }

    #[test]
    fn bare_kings_are_drawn() {
        let mut env = ChessEnv::from_fen("8/8/4k3/8/8/3K4/8/8 w - - 0 1").unwrap();
        let term = env.terminal().unwrap();
        assert_eq!(term.reason, "Draw by insufficient material");
    }

    #[test]
    fn knight_endgames_are_drawn() {
        let mut env = ChessEnv::from_fen("8/8/4k3/5n2/8/3K4/8/8 w - - 0 1").unwrap();
        assert_eq!(env.terminal().unwrap().reason, "Draw by insufficient material");

        let mut env = ChessEnv::from_fen("8/8/4k3/5n2/8/3KN3/8/8 w - - 0 1").unwrap();
        assert_eq!(env.terminal().unwrap().reason, "Draw by insufficient material");
    }

    #[test]
    fn rook_endgame_is_not_drawn() {
        let mut env = ChessEnv::from_fen("8/8/4k3/5r2/8/3K4/8/8 w - - 0 1").unwrap();
        assert!(env.terminal().is_none());
    }

    #[test]
    fn threefold_repetition_is_terminal() {
        let mut env = ChessEnv::default();

        // shuffle the knights back and forth: the start position recurs
        let push_uci = |env: &mut ChessEnv, from: &str, to: &str| {
            let m = env
                .pos
                .legal_moves()
                .iter()
                .find(|m| {
                    m.from().map(|s| s.to_string()) == Some(from.to_string())
                        && m.to().to_string() == to
                })
                .cloned()
                .unwrap();
            let action = codec::move_to_action(&env.pos, &m);
            env.push(action);
        };

        for _ in 0..2 {
            push_uci(&mut env, "g1", "f3");
            push_uci(&mut env, "g8", "f6");
            push_uci(&mut env, "f3", "g1");
            push_uci(&mut env, "f6", "g8");
        }

        let term = env.terminal().unwrap();
        assert_eq!(term.reason, "Draw by threefold repetition");
    }

    #[test]
    fn fifty_move_rule_is_terminal() {
        let mut env = ChessEnv::from_fen("8/8/4k3/5r2/8/3K4/8/8 w - - 50 40").unwrap();
        assert_eq!(env.terminal().unwrap().reason, "Draw by 50-move rule");
    }

    #[test]
    fn pgn_requires_terminal() {
        let mut env = ChessEnv::default();
        assert!(env.pgn().is_err());
    }

    #[test]
    fn pgn_of_finished_game() {
        let mut env = ChessEnv::default();
        let play = ["f2f3", "e7e5", "g2g4", "d8h4"];
        for uci in play {
            let m = env
                .pos
                .legal_moves()
                .iter()
                .find(|m| {
                    m.from().map(|s| s.to_string()) == Some(uci[..2].to_string())
                        && m.to().to_string() == uci[2..]
                })
                .cloned()
                .unwrap();
            let action = codec::move_to_action(&env.pos, &m);
            env.push(action);
        }

        let pgn = env.pgn().unwrap();
        assert_eq!(pgn, "1. f3 e5 2. g4 Qh4# 0-1 {White is checkmated}");
    }
}
