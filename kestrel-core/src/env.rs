use thiserror::Error;

/// A terminal game result: the absolute outcome in `[-1, 1]` (positive means
/// the first player won) and a human-readable reason, used verbatim as the
/// PGN terminating comment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalState {
    pub value: f32,
    pub reason: &'static str,
}

#[derive(Debug, Error)]
#[error("game is not in a terminal state")]
pub struct NotTerminal;

/// A two-player zero-sum game environment with a move history stack.
///
/// Moves are exposed as *actions*: indices into a fixed policy space of
/// length [Env::policy_len]. `push`/`pop` must be balanced, and a `pop` must
/// restore every observable aspect of the prior state, including the
/// repetition and halfmove history.
pub trait Env: Default {
    /// Side to move: `1.0` for the first player, `-1.0` for the second.
    fn turn(&self) -> f32;

    /// Number of moves played since the initial position.
    fn ply(&self) -> usize;

    /// Length of the policy index space.
    fn policy_len(&self) -> usize;

    /// Length of the flattened observation tensor.
    fn obs_len(&self) -> usize;

    /// Legal moves encoded as policy indices. Memoized until the next mutation.
    fn actions(&mut self) -> &[usize];

    /// Write the observation tensor for the side to move into `out`.
    fn observe(&self, out: &mut [f32]);

    /// Play the move behind `action`, which must be a current legal action.
    fn push(&mut self, action: usize);

    /// Undo the last [Env::push].
    fn pop(&mut self);

    /// Check whether the game has ended.
    fn terminal(&mut self) -> Option<TerminalState>;

    /// Heuristic evaluation of the current position from the side to move's
    /// point of view, scaled by `window` and clamped to `[-1, 1]`.
    fn bootstrap_value(&self, window: f32) -> f32;

    /// Render the finished game as PGN movetext. Fails on non-terminal states.
    fn pgn(&mut self) -> Result<String, NotTerminal>;
}
