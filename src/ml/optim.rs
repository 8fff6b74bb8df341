// ============================================================
// Layer 5 — Optimizers with Named Slots
// ============================================================
// SGD-with-momentum and Adam over a VariableStore. Both keep
// their per-weight state ("slots") in a table keyed by
// (weight name, slot name), which is exactly the interface the
// transfer engine needs: slots are enumerable by name and
// individually readable/writable, so momentum and moment
// estimates can be remapped right alongside the weights they
// belong to.
//
// Slot tensors live on the inner (non-autodiff) backend — they
// carry values, never gradients.
//
// Reference: Burn Book §5 (Autodiff)

use std::collections::HashMap;

use burn::tensor::backend::AutodiffBackend;

use crate::domain::error::Result;
use crate::ml::vars::{VariableStore, WeightTensor};

/// An optimizer whose per-weight state is addressable by slot name.
pub trait SlotOptimizer<B: AutodiffBackend> {
    /// The slot names this optimizer maintains per weight.
    fn slot_names(&self) -> Vec<String>;

    /// The slot tensor for one weight, if it exists yet.
    fn slot(&self, weight: &str, slot: &str) -> Option<WeightTensor<B::InnerBackend>>;

    /// Overwrite one weight's slot tensor.
    fn set_slot(&mut self, weight: &str, slot: &str, value: WeightTensor<B::InnerBackend>);

    /// Create zeroed slots for every weight in the store. Called once
    /// before training (or before transfer, so remapped slots have a
    /// base to land in).
    fn initialize_slots(&mut self, store: &VariableStore<B>) -> Result<()>;

    /// Apply one gradient step to every trainable weight.
    fn step(
        &mut self,
        learning_rate: f64,
        store: &mut VariableStore<B>,
        grads: &B::Gradients,
    ) -> Result<()>;
}

type SlotTable<B> = HashMap<(String, String), WeightTensor<B>>;

fn zero_slots<B: AutodiffBackend>(
    store: &VariableStore<B>,
    slot_names: &[&str],
    slots: &mut SlotTable<B::InnerBackend>,
) {
    for (name, var) in store.iter() {
        for slot in slot_names {
            slots.insert(
                (name.clone(), slot.to_string()),
                var.weight.clone().inner().zeros_like(),
            );
        }
    }
}

// ─── SGD with momentum ────────────────────────────────────────────────────────

/// v ← μ·v + g ; w ← w − lr·v
pub struct Sgd<B: AutodiffBackend> {
    momentum: f64,
    slots: SlotTable<B::InnerBackend>,
}

impl<B: AutodiffBackend> Sgd<B> {
    pub fn new(momentum: f64) -> Self {
        Self {
            momentum,
            slots: HashMap::new(),
        }
    }
}

impl<B: AutodiffBackend> SlotOptimizer<B> for Sgd<B> {
    fn slot_names(&self) -> Vec<String> {
        vec!["momentum".to_string()]
    }

    fn slot(&self, weight: &str, slot: &str) -> Option<WeightTensor<B::InnerBackend>> {
        self.slots
            .get(&(weight.to_string(), slot.to_string()))
            .cloned()
    }

    fn set_slot(&mut self, weight: &str, slot: &str, value: WeightTensor<B::InnerBackend>) {
        self.slots
            .insert((weight.to_string(), slot.to_string()), value);
    }

    fn initialize_slots(&mut self, store: &VariableStore<B>) -> Result<()> {
        zero_slots::<B>(store, &["momentum"], &mut self.slots);
        Ok(())
    }

    fn step(
        &mut self,
        learning_rate: f64,
        store: &mut VariableStore<B>,
        grads: &B::Gradients,
    ) -> Result<()> {
        for name in store.trainable_names() {
            let weight = store.weight(&name)?;
            let Some(grad) = weight.grad(grads) else {
                continue;
            };
            let key = (name.clone(), "momentum".to_string());
            let velocity = match self.slots.get(&key) {
                Some(v) => v.clone().mul_scalar(self.momentum).add(grad)?,
                None => grad,
            };
            let updated = weight
                .inner()
                .sub(velocity.clone().mul_scalar(learning_rate))?;
            self.slots.insert(key, velocity);
            store.set_weight(&name, WeightTensor::from_inner(updated).require_grad())?;
        }
        Ok(())
    }
}

// ─── Adam ─────────────────────────────────────────────────────────────────────

/// Adam with bias correction. Slots: "m" (first moment), "v" (second).
pub struct Adam<B: AutodiffBackend> {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: u64,
    slots: SlotTable<B::InnerBackend>,
}

impl<B: AutodiffBackend> Adam<B> {
    pub fn new() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            slots: HashMap::new(),
        }
    }
}

impl<B: AutodiffBackend> Default for Adam<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> SlotOptimizer<B> for Adam<B> {
    fn slot_names(&self) -> Vec<String> {
        vec!["m".to_string(), "v".to_string()]
    }

    fn slot(&self, weight: &str, slot: &str) -> Option<WeightTensor<B::InnerBackend>> {
        self.slots
            .get(&(weight.to_string(), slot.to_string()))
            .cloned()
    }

    fn set_slot(&mut self, weight: &str, slot: &str, value: WeightTensor<B::InnerBackend>) {
        self.slots
            .insert((weight.to_string(), slot.to_string()), value);
    }

    fn initialize_slots(&mut self, store: &VariableStore<B>) -> Result<()> {
        zero_slots::<B>(store, &["m", "v"], &mut self.slots);
        Ok(())
    }

    fn step(
        &mut self,
        learning_rate: f64,
        store: &mut VariableStore<B>,
        grads: &B::Gradients,
    ) -> Result<()> {
        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step as i32);

        for name in store.trainable_names() {
            let weight = store.weight(&name)?;
            let Some(grad) = weight.grad(grads) else {
                continue;
            };
            let zero = weight.clone().inner().zeros_like();
            let m_key = (name.clone(), "m".to_string());
            let v_key = (name.clone(), "v".to_string());

            let m = self
                .slots
                .get(&m_key)
                .cloned()
                .unwrap_or_else(|| zero.clone())
                .mul_scalar(self.beta1)
                .add(grad.clone().mul_scalar(1.0 - self.beta1))?;
            let v = self
                .slots
                .get(&v_key)
                .cloned()
                .unwrap_or(zero)
                .mul_scalar(self.beta2)
                .add(grad.clone().mul(grad)?.mul_scalar(1.0 - self.beta2))?;

            let m_hat = m.clone().mul_scalar(1.0 / bias1);
            let v_hat = v.clone().mul_scalar(1.0 / bias2);
            let update = m_hat
                .mul_scalar(learning_rate)
                .div(v_hat.sqrt().add_scalar(self.epsilon))?;
            let updated = weight.inner().sub(update)?;

            self.slots.insert(m_key, m);
            self.slots.insert(v_key, v);
            store.set_weight(&name, WeightTensor::from_inner(updated).require_grad())?;
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::vars::{WeightInit, WeightSpec};
    use burn::prelude::*;

    type TB = burn::backend::Autodiff<burn::backend::NdArray>;

    fn quadratic_store(device: &<TB as Backend>::Device) -> VariableStore<TB> {
        let specs =
            vec![WeightSpec::vector("w", 2).with_init(WeightInit::Ones)];
        VariableStore::create(&specs, device).unwrap()
    }

    fn loss_of(store: &VariableStore<TB>) -> Tensor<TB, 1> {
        // L = sum(w^2), minimized at 0
        let w = store.vector("w").unwrap();
        (w.clone() * w).sum().reshape([1])
    }

    #[test]
    fn test_sgd_descends() {
        let device = Default::default();
        let mut store = quadratic_store(&device);
        let mut opt = Sgd::<TB>::new(0.0);
        opt.initialize_slots(&store).unwrap();

        let before = crate::ml::ops::float_vec(loss_of(&store)).unwrap()[0];
        for _ in 0..10 {
            let loss = loss_of(&store);
            let grads = loss.backward();
            opt.step(0.1, &mut store, &grads).unwrap();
        }
        let after = crate::ml::ops::float_vec(loss_of(&store)).unwrap()[0];
        assert!(after < before, "loss should drop: {before} -> {after}");
    }

    #[test]
    fn test_sgd_momentum_slot_is_populated() {
        let device = Default::default();
        let mut store = quadratic_store(&device);
        let mut opt = Sgd::<TB>::new(0.9);
        opt.initialize_slots(&store).unwrap();

        let loss = loss_of(&store);
        let grads = loss.backward();
        opt.step(0.1, &mut store, &grads).unwrap();

        let slot = opt.slot("w", "momentum").unwrap();
        let vals = slot.to_flat_vec().unwrap();
        // first step: v = g = 2*w = 2.0 per element
        assert!((vals[0] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_adam_descends_and_keeps_both_slots() {
        let device = Default::default();
        let mut store = quadratic_store(&device);
        let mut opt = Adam::<TB>::new();
        opt.initialize_slots(&store).unwrap();

        let before = crate::ml::ops::float_vec(loss_of(&store)).unwrap()[0];
        for _ in 0..20 {
            let loss = loss_of(&store);
            let grads = loss.backward();
            opt.step(0.05, &mut store, &grads).unwrap();
        }
        let after = crate::ml::ops::float_vec(loss_of(&store)).unwrap()[0];
        assert!(after < before);
        assert!(opt.slot("w", "m").is_some());
        assert!(opt.slot("w", "v").is_some());
        assert_eq!(
            <Adam<TB> as SlotOptimizer<TB>>::slot_names(&opt),
            vec!["m", "v"]
        );
    }

    #[test]
    fn test_frozen_weight_is_not_updated() {
        let device = Default::default();
        let specs = vec![
            WeightSpec::vector("a", 2).with_init(WeightInit::Ones),
            WeightSpec::vector("b", 2).with_init(WeightInit::Ones),
        ];
        let mut store = VariableStore::<TB>::create(&specs, &device).unwrap();
        store.freeze_prefixes(&["b".to_string()]).unwrap();

        let mut opt = Sgd::<TB>::new(0.0);
        opt.initialize_slots(&store).unwrap();

        let a = store.vector("a").unwrap();
        let b = store.vector("b").unwrap();
        let loss = ((a.clone() * a).sum() + (b.clone() * b).sum()).reshape([1]);
        let grads = loss.backward();
        opt.step(0.1, &mut store, &grads).unwrap();

        let b_after = crate::ml::ops::float_vec(store.vector("b").unwrap()).unwrap();
        assert_eq!(b_after, vec![1.0, 1.0], "frozen weight must not move");
        let a_after = crate::ml::ops::float_vec(store.vector("a").unwrap()).unwrap();
        assert!((a_after[0] - 1.0).abs() > 1e-6, "trainable weight must move");
    }
}
