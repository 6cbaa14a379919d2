/// Enforces that every tx declares a `last_height` no older than the grace
/// period: a tx is acceptable iff
/// `current_height − grace_period ≤ last_height ≤ current_height`.
pub struct BlockBindingManager {
    grace_period: u64,
    height: u64,
}

impl BlockBindingManager {
    pub fn new(grace_period: u64, last_height: u64) -> BlockBindingManager {
        BlockBindingManager {
            grace_period,
            height: last_height,
        }
    }

    pub fn update(&mut self, height: u64) {
        self.height = height;
    }

    pub fn check(&self, last_height: u64) -> bool {
        last_height <= self.height && last_height >= self.height.saturating_sub(self.grace_period)
    }
}
