//! Bijection between chess moves and indices in the fixed policy space.
//!
//! Every move is anchored at its source square in the mover's point of view
//! (the board is rotated for the second player) and classified into one of 73
//! per-square slots: 56 ray slots (8 directions x 7 distances), 8 knight
//! slots, and 9 under-promotion slots (3 directions x 3 pieces).

use shakmaty::{CastlingSide, Chess, Color, Move, Position, Role, Square};

pub const POLICY_SIZE: usize = 73 * 64;

const KNIGHT_SLOTS: usize = 56;
const PROMO_SLOTS: usize = 64;

/// (file, rank) deltas, in the order N, S, E, W, NE, NW, SE, SW.
const RAY_DIRS: [(i32, i32); 8] = [
    (0, 1),
    (0, -1),
    (1, 0),
    (-1, 0),
    (1, 1),
    (-1, 1),
    (1, -1),
    (-1, -1),
];

/// Knight (file, rank) deltas, ordered W-NW, N-NW, E-NE, N-NE, W-SW, S-SW, E-SE, S-SE.
const KNIGHT_DIRS: [(i32, i32); 8] = [
    (-2, 1),
    (-1, 2),
    (2, 1),
    (1, 2),
    (-2, -1),
    (-1, -2),
    (2, -1),
    (1, -2),
];

/// Under-promotion (file, rank) deltas: NW, N, NE.
const PROMO_DIRS: [(i32, i32); 3] = [(-1, 1), (0, 1), (1, 1)];
const PROMO_ROLES: [Role; 3] = [Role::Knight, Role::Bishop, Role::Rook];

fn pov_index(sq: Square, flip: bool) -> usize {
    let index = u32::from(sq) as usize;
    if flip {
        63 - index
    } else {
        index
    }
}

/// The geometric endpoints of a move, with castling normalized to the
/// two-square king move it is written as over the wire.
fn move_endpoints(m: &Move) -> (Square, Square, Option<Role>) {
    match *m {
        Move::Normal {
            from, to, promotion, ..
        } => (from, to, promotion),
        Move::EnPassant { from, to } => (from, to, None),
        Move::Castle { king, rook } => {
            let side = if rook > king {
                CastlingSide::KingSide
            } else {
                CastlingSide::QueenSide
            };
            let to = Square::from_coords(side.king_to_file(), king.rank());
            (king, to, None)
        }
        Move::Put { .. } => unreachable!("no drops in standard chess"),
    }
}

/// Map a legal move to its policy index. Total over the legal moves of `pos`.
pub fn move_to_action(pos: &Chess, m: &Move) -> usize {
    let flip = pos.turn() == Color::Black;
    let (from, to, promotion) = move_endpoints(m);

    let src = pov_index(from, flip);
    let dst = pov_index(to, flip);

    let df = (dst % 8) as i32 - (src % 8) as i32;
    let dr = (dst / 8) as i32 - (src / 8) as i32;

    let slot = match promotion {
        Some(role) if role != Role::Queen => {
            debug_assert_eq!(dr, 1, "under-promotion must step one rank forward");
            let piece = PROMO_ROLES
                .iter()
                .position(|&r| r == role)
                .expect("promotion piece must be a knight, bishop or rook");
            PROMO_SLOTS + 3 * piece + (df + 1) as usize
        }
        _ if m.role() == Role::Knight => {
            let mut index = (dr.abs() - 1) as usize;
            if dr < 0 {
                index += 4;
            }
            if df > 0 {
                index += 2;
            }
            KNIGHT_SLOTS + index
        }
        _ => {
            debug_assert!(
                df == 0 || dr == 0 || df.abs() == dr.abs(),
                "non-knight move must lie on a ray"
            );
            let ray = RAY_DIRS
                .iter()
                .position(|&d| d == (df.signum(), dr.signum()))
                .expect("ray direction");
            let distance = df.abs().max(dr.abs()) as usize;
            ray * 7 + (distance - 1)
        }
    };

    src * 73 + slot
}

/// Map a policy index back to a legal move of `pos`, if there is one.
///
/// Indices that point off the board, wrap around an edge or name a move that
/// is not legal in `pos` yield `None`; callers must treat that as "no move".
pub fn action_to_move(pos: &Chess, action: usize) -> Option<Move> {
    if action >= POLICY_SIZE {
        return None;
    }

    let flip = pos.turn() == Color::Black;
    let src = action / 73;
    let slot = action % 73;

    let (df, dr, promotion) = if slot < KNIGHT_SLOTS {
        let (f, r) = RAY_DIRS[slot / 7];
        let distance = (slot % 7 + 1) as i32;
        (f * distance, r * distance, None)
    } else if slot < PROMO_SLOTS {
        let (f, r) = KNIGHT_DIRS[slot - KNIGHT_SLOTS];
        (f, r, None)
    } else {
        let (f, r) = PROMO_DIRS[(slot - PROMO_SLOTS) % 3];
        (f, r, Some(PROMO_ROLES[(slot - PROMO_SLOTS) / 3]))
    };

    let file = (src % 8) as i32 + df;
    let rank = (src / 8) as i32 + dr;
    if !(0..8).contains(&file) || !(0..8).contains(&rank) {
        return None;
    }
    let dst = (rank * 8 + file) as usize;

    let from = Square::new(if flip { 63 - src } else { src } as u32);
    let to = Square::new(if flip { 63 - dst } else { dst } as u32);

    pos.legal_moves().iter().find_map(|m| {
        let (mf, mt, mp) = move_endpoints(m);
        let promo_matches = match promotion {
            Some(role) => mp == Some(role),
            // ray slots carry both quiet moves and queen promotions
            None => mp.is_none() || mp == Some(Role::Queen),
        };
        (mf == from && mt == to && promo_matches).then(|| m.clone())
    })
}
