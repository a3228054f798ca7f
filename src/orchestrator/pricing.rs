// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Generation pricing: each regeneration of a draft costs more, up to a cap

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostPolicy {
    pub base: i64,
    pub step: i64,
    pub cap: i64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            base: 100,
            step: 100,
            cap: 300,
        }
    }
}

impl CostPolicy {
    /// `min(base + regen_count * step, cap)`
    pub fn cost(&self, regen_count: u32) -> i64 {
        self.base
            .saturating_add((regen_count as i64).saturating_mul(self.step))
            .min(self.cap)
    }
}
