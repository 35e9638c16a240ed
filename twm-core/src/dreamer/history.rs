//! Latent history the dynamics model conditions on.
use crate::{
    base::{DynamicsInput, WorldModel},
    error::TwmError,
};
use anyhow::Result;
use ndarray::{concatenate, s, Array1, Array2, Array3, Axis, Zip};

/// The last `n` latents of a rollout with the actions between them and the
/// values observed on arrival at each latent.
pub(super) struct History {
    /// `[B, n, Z]`
    z: Array3<f32>,

    /// `[B, n - 1, A]`, `None` while `n == 1`.
    a: Option<Array3<f32>>,

    /// Arrival rewards `[B, n]`.
    r: Array2<f32>,

    /// Arrival discounts `[B, n]`.
    g: Array2<f32>,

    /// Arrival done flags `[B, n]`.
    d: Array2<bool>,

    /// Hidden state paired with the current latent.
    pub h: Option<Array2<f32>>,
}

impl History {
    /// Builds a history from `n` latents and the `n - 1` transitions between them.
    pub fn new<W: WorldModel>(
        wm: &W,
        z: Array3<f32>,
        a: &Array3<f32>,
        r: &Array2<f32>,
        terminated: &Array2<bool>,
        truncated: &Array2<bool>,
    ) -> Result<Self> {
        let (b, n) = (z.shape()[0], z.shape()[1]);
        if n == 0
            || a.shape()[0] != b
            || a.shape()[1] + 1 != n
            || r.dim() != (b, n - 1)
            || terminated.dim() != (b, n - 1)
            || truncated.dim() != (b, n - 1)
        {
            return Err(TwmError::Shape(format!(
                "history of {:?} latents with actions {:?}, rewards {:?} and flags {:?}/{:?}",
                z.shape(),
                a.shape(),
                r.shape(),
                terminated.shape(),
                truncated.shape()
            ))
            .into());
        }

        let mut r_ = Array2::zeros((b, n));
        r_.slice_mut(s![.., 1..]).assign(r);
        let mut g_ = Array2::ones((b, n));
        g_.slice_mut(s![.., 1..]).assign(&wm.to_discounts(terminated));
        let mut d_ = Array2::from_elem((b, n), false);
        d_.slice_mut(s![.., 1..]).assign(
            &Zip::from(terminated)
                .and(truncated)
                .map_collect(|t, u| *t || *u),
        );

        Ok(Self {
            z,
            a: if n > 1 { Some(a.clone()) } else { None },
            r: r_,
            g: g_,
            d: d_,
            h: None,
        })
    }

    /// Number of latents.
    pub fn len(&self) -> usize {
        self.z.shape()[1]
    }

    pub fn batch_size(&self) -> usize {
        self.z.shape()[0]
    }

    /// The latest latent `[B, Z]`.
    pub fn current_z(&self) -> Array2<f32> {
        self.z.index_axis(Axis(1), self.len() - 1).to_owned()
    }

    /// Input over all latents but the latest one, whose action is unknown yet.
    pub fn warmup_input(&self) -> Option<DynamicsInput> {
        let n = self.len();
        let a = self.a.as_ref()?;
        Some(DynamicsInput {
            z: self.z.slice(s![.., ..n - 1, ..]).to_owned(),
            a: a.clone(),
            r: self.r.slice(s![.., ..n - 1]).to_owned(),
            g: self.g.slice(s![.., ..n - 1]).to_owned(),
            d: self.d.slice(s![.., ..n - 1]).to_owned(),
        })
    }

    /// Input over all latents, taking `act` at the latest one.
    pub fn input_with(&self, act: &Array2<f32>) -> Result<DynamicsInput> {
        if act.nrows() != self.batch_size() {
            return Err(TwmError::Shape(format!(
                "{} actions for {} rows",
                act.nrows(),
                self.batch_size()
            ))
            .into());
        }
        let act = act.view().insert_axis(Axis(1));
        let a = match &self.a {
            Some(a) => concatenate(Axis(1), &[a.view(), act])?,
            None => act.to_owned(),
        };
        Ok(DynamicsInput {
            z: self.z.clone(),
            a,
            r: self.r.clone(),
            g: self.g.clone(),
            d: self.d.clone(),
        })
    }

    /// Appends the next latent. `input` must come from [`History::input_with`].
    #[allow(clippy::too_many_arguments)]
    pub fn advance(
        &mut self,
        input: DynamicsInput,
        z: &Array2<f32>,
        r: &Array1<f32>,
        g: &Array1<f32>,
        d: &Array1<bool>,
        h: Option<Array2<f32>>,
        memory_length: usize,
    ) -> Result<()> {
        let ax = Axis(1);
        self.z = concatenate(ax, &[input.z.view(), z.view().insert_axis(ax)])?;
        self.a = Some(input.a);
        self.r = concatenate(ax, &[input.r.view(), r.view().insert_axis(ax)])?;
        self.g = concatenate(ax, &[input.g.view(), g.view().insert_axis(ax)])?;
        self.d = concatenate(ax, &[input.d.view(), d.view().insert_axis(ax)])?;
        self.h = h;
        self.trim(memory_length);
        Ok(())
    }

    /// Keeps the last `memory_length` latents.
    pub fn trim(&mut self, memory_length: usize) {
        let m = memory_length.max(1);
        let n = self.len();
        if n <= m {
            return;
        }
        let k = n - m;
        self.z = self.z.slice(s![.., k.., ..]).to_owned();
        self.a = match (&self.a, m) {
            (Some(a), m) if m > 1 => Some(a.slice(s![.., k.., ..]).to_owned()),
            _ => None,
        };
        self.r = self.r.slice(s![.., k..]).to_owned();
        self.g = self.g.slice(s![.., k..]).to_owned();
        self.d = self.d.slice(s![.., k..]).to_owned();
    }
}
