//! Trajectory recorded by a roller with `store_data`.
use crate::base::Trajectory;
use anyhow::Result;
use ndarray::{concatenate, stack, Array, Array1, Array2, Array3, ArrayD, Axis, Dimension, RemoveAxis};

pub(super) struct Recording {
    z: Vec<Array2<f32>>,
    o: Vec<ArrayD<f32>>,
    h: Vec<Option<Array2<f32>>>,
    a: Vec<Array2<f32>>,
    r: Vec<Array1<f32>>,
    g: Vec<Array1<f32>>,
    d: Vec<Array1<bool>>,
    weights: Vec<Array1<f32>>,
}

/// Stacks per-step arrays along a new time axis.
fn stack_steps<T, D>(xs: &[Array<T, D>], empty: Array<T, D::Larger>) -> Result<Array<T, D::Larger>>
where
    T: Clone,
    D: Dimension,
    D::Larger: RemoveAxis,
{
    if xs.is_empty() {
        return Ok(empty);
    }
    let views: Vec<_> = xs.iter().map(|x| x.view()).collect();
    Ok(stack(Axis(1), &views)?)
}

impl Recording {
    /// Starts a recording at the given latent.
    pub fn new(z: Array2<f32>, h: Option<Array2<f32>>, o: Option<ArrayD<f32>>) -> Self {
        Self {
            z: vec![z],
            o: o.into_iter().collect(),
            h: vec![h],
            a: vec![],
            r: vec![],
            g: vec![],
            d: vec![],
            weights: vec![],
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        a: Array2<f32>,
        z: Array2<f32>,
        h: Option<Array2<f32>>,
        o: Option<ArrayD<f32>>,
        r: Array1<f32>,
        g: Array1<f32>,
        d: Array1<bool>,
        weights: Array1<f32>,
    ) {
        self.a.push(a);
        self.z.push(z);
        self.h.push(h);
        self.o.extend(o);
        self.r.push(r);
        self.g.push(g);
        self.d.push(d);
        self.weights.push(weights);
    }

    /// Stacks hidden states; missing ones are zero.
    fn hidden(&self, b: usize) -> Result<Option<Array3<f32>>> {
        let dim = match self.h.iter().flatten().next() {
            Some(h) => h.ncols(),
            None => return Ok(None),
        };
        let hs: Vec<Array2<f32>> = self
            .h
            .iter()
            .map(|h| h.clone().unwrap_or_else(|| Array2::zeros((b, dim))))
            .collect();
        Ok(Some(stack_steps(&hs, Array3::zeros((b, 0, dim)))?))
    }

    /// Returns the recorded trajectory and restarts the recording at its last latent.
    pub fn flush(&mut self) -> Result<Trajectory> {
        let (b, zdim) = self.z[0].dim();
        let obs = if self.o.is_empty() {
            None
        } else {
            let views: Vec<_> = self.o.iter().map(|o| o.view()).collect();
            Some(concatenate(Axis(1), &views)?)
        };

        let trajectory = Trajectory {
            z: stack_steps(&self.z, Array3::zeros((b, 0, zdim)))?,
            o: obs,
            h: self.hidden(b)?,
            a: stack_steps(&self.a, Array3::zeros((b, 0, 0)))?,
            r: stack_steps(&self.r, Array2::zeros((b, 0)))?,
            g: stack_steps(&self.g, Array2::zeros((b, 0)))?,
            d: stack_steps(&self.d, Array2::from_elem((b, 0), false))?,
            weights: stack_steps(&self.weights, Array2::zeros((b, 0)))?,
        };

        let z = self.z.pop().unwrap_or_else(|| Array2::zeros((b, zdim)));
        let h = self.h.pop().flatten();
        let o = self.o.pop();
        *self = Self::new(z, h, o);

        Ok(trajectory)
    }
}
