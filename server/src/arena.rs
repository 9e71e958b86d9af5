//! Ball and paddle simulation for a single match.
//!
//! The arena is pure data plus a stepping function. Coordinates follow the
//! canvas convention: the origin is the top-left corner and `y` grows downwards.
//! Paddle `p1` guards the left edge and `p2` the right edge; in quad mode `p3`
//! guards the top edge and `p4` the bottom edge.

use rand::Rng;
use shared::{
    paddle_key, ArenaSnapshot, Ball, Mode, BALL_RADIUS, BALL_SPEED, PADDLE_LENGTH,
    PADDLE_OFFSET, PADDLE_WIDTH,
};
use std::f32::consts::PI;

/// Launch angle bounds, measured from the primary travel axis.
const MIN_LAUNCH_ANGLE: f32 = PI / 12.0;
const MAX_LAUNCH_ANGLE: f32 = PI / 4.0;

/// Arena edge a paddle guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

impl Edge {
    /// Returns the edge guarded by the paddle at the given zero-based index.
    pub fn of_paddle(index: usize) -> Edge {
        match index {
            0 => Edge::Left,
            1 => Edge::Right,
            2 => Edge::Top,
            _ => Edge::Bottom,
        }
    }

    /// Returns the index of the paddle that scores when the ball leaves through this edge.
    pub fn scorer(self) -> usize {
        match self {
            Edge::Left => 1,
            Edge::Right => 0,
            Edge::Top => 3,
            Edge::Bottom => 2,
        }
    }

    /// +1 when the edge sits at coordinate zero, -1 when it sits at the far boundary.
    fn direction(self) -> f32 {
        match self {
            Edge::Left | Edge::Top => 1.0,
            Edge::Right | Edge::Bottom => -1.0,
        }
    }
}

/// A goal scored during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Goal {
    /// Edge the ball left through.
    pub edge: Edge,
    /// Zero-based index of the paddle credited with the point.
    pub scorer: usize,
}

#[derive(Debug, Clone)]
pub struct Arena {
    pub mode: Mode,
    pub width: f32,
    pub height: f32,
    pub ball: Ball,
    /// Paddle centres along each paddle's own axis, indexed by join order.
    pub paddles: Vec<f32>,
}

impl Arena {
    /// Creates an arena with centred paddles and the ball parked at the centre.
    pub fn new(mode: Mode) -> Self {
        let width = mode.width();
        let height = mode.height();
        let paddles = (0..mode.participants())
            .map(|index| match Edge::of_paddle(index) {
                Edge::Left | Edge::Right => height / 2.0,
                Edge::Top | Edge::Bottom => width / 2.0,
            })
            .collect();

        Self {
            mode,
            width,
            height,
            ball: Ball {
                x: width / 2.0,
                y: height / 2.0,
                vx: 0.0,
                vy: 0.0,
            },
            paddles,
        }
    }

    /// Length of the boundary the given paddle slides along.
    fn boundary(&self, index: usize) -> f32 {
        match Edge::of_paddle(index) {
            Edge::Left | Edge::Right => self.height,
            Edge::Top | Edge::Bottom => self.width,
        }
    }

    /// Moves a paddle, clamped to `[PADDLE_LENGTH / 2, boundary - PADDLE_LENGTH / 2]`.
    /// Unknown indexes and non-finite values are ignored.
    pub fn set_paddle(&mut self, index: usize, value: f32) -> bool {
        if index >= self.paddles.len() || !value.is_finite() {
            return false;
        }
        let half = PADDLE_LENGTH / 2.0;
        let max = self.boundary(index) - half;
        self.paddles[index] = value.clamp(half, max);
        true
    }

    /// Puts the ball back at the centre with a fresh random direction.
    ///
    /// The speed is always `BALL_SPEED` and both velocity components are
    /// nonzero. Duo matches always serve along `x`; quad matches pick the
    /// primary axis at random.
    pub fn launch<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let angle = rng.gen_range(MIN_LAUNCH_ANGLE..=MAX_LAUNCH_ANGLE);
        let primary = BALL_SPEED * angle.cos();
        let secondary = BALL_SPEED * angle.sin();
        let sign = |positive: bool| if positive { 1.0 } else { -1.0 };
        let primary = primary * sign(rng.gen_bool(0.5));
        let secondary = secondary * sign(rng.gen_bool(0.5));

        let along_x = match self.mode {
            Mode::Duo => true,
            Mode::Quad => rng.gen_bool(0.5),
        };
        let (vx, vy) = if along_x {
            (primary, secondary)
        } else {
            (secondary, primary)
        };

        self.ball = Ball {
            x: self.width / 2.0,
            y: self.height / 2.0,
            vx,
            vy,
        };
    }

    /// Advances the ball by one fixed step and resolves bounces.
    ///
    /// Returns the goal scored during this step, if any. The ball is left where
    /// it exited; the caller decides when to serve again.
    pub fn step(&mut self, dt: f32) -> Option<Goal> {
        self.ball.x += self.ball.vx * dt;
        self.ball.y += self.ball.vy * dt;

        if self.mode == Mode::Duo {
            self.bounce_off_walls();
        }

        for index in 0..self.paddles.len() {
            if self.deflect(index) {
                break;
            }
        }

        self.detect_goal()
    }

    fn bounce_off_walls(&mut self) {
        let ball = &mut self.ball;
        if ball.y - BALL_RADIUS <= 0.0 {
            ball.vy = ball.vy.abs();
            ball.y = BALL_RADIUS;
        } else if ball.y + BALL_RADIUS >= self.height {
            ball.vy = -ball.vy.abs();
            ball.y = self.height - BALL_RADIUS;
        }
    }

    /// Reflects the ball off one paddle. Returns true when it hit.
    fn deflect(&mut self, index: usize) -> bool {
        let edge = Edge::of_paddle(index);
        let centre = self.paddles[index];
        let dir = edge.direction();
        let (width, height) = (self.width, self.height);
        let ball = &mut self.ball;

        // (position across the paddle face, matching velocity, position along the paddle)
        let (across, velocity, along, boundary) = match edge {
            Edge::Left | Edge::Right => (&mut ball.x, &mut ball.vx, ball.y, width),
            Edge::Top | Edge::Bottom => (&mut ball.y, &mut ball.vy, ball.x, height),
        };

        let face = if dir > 0.0 {
            PADDLE_OFFSET
        } else {
            boundary - PADDLE_OFFSET
        };
        let back = face - dir * PADDLE_WIDTH;

        let approaching = *velocity * dir < 0.0;
        let leading_crossed = (*across - dir * BALL_RADIUS - face) * dir <= 0.0;
        let trailing_in_front = (*across + dir * BALL_RADIUS - back) * dir >= 0.0;
        let covered = (along - centre).abs() <= PADDLE_LENGTH / 2.0;

        if approaching && leading_crossed && trailing_in_front && covered {
            *velocity = dir * velocity.abs();
            *across = face + dir * BALL_RADIUS;
            true
        } else {
            false
        }
    }

    fn detect_goal(&self) -> Option<Goal> {
        let ball = &self.ball;
        let edge = if ball.x + BALL_RADIUS < 0.0 {
            Some(Edge::Left)
        } else if ball.x - BALL_RADIUS > self.width {
            Some(Edge::Right)
        } else if self.mode == Mode::Quad && ball.y + BALL_RADIUS < 0.0 {
            Some(Edge::Top)
        } else if self.mode == Mode::Quad && ball.y - BALL_RADIUS > self.height {
            Some(Edge::Bottom)
        } else {
            None
        };

        edge.map(|edge| Goal {
            edge,
            scorer: edge.scorer(),
        })
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        ArenaSnapshot {
            mode: self.paddles.len() as u8,
            paddles: self
                .paddles
                .iter()
                .enumerate()
                .map(|(index, position)| (paddle_key(index), *position))
                .collect(),
            ball: self.ball,
        }
    }
}
