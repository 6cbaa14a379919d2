//! Per-block incentive and penalty history, kept in dual height-first and
//! address-first indexes so both query directions are a single prefix scan.

use amo_types::{Address, Currency};

use super::Store;

const INCENTIVE_HEIGHT: &[u8] = b"incentive:height:";
const INCENTIVE_ADDRESS: &[u8] = b"incentive:address:";
const PENALTY_HEIGHT: &[u8] = b"penalty:height:";
const PENALTY_ADDRESS: &[u8] = b"penalty:address:";

fn height_first_key(prefix: &[u8], height: u64, addr: &Address) -> Vec<u8> {
    [prefix, &height.to_be_bytes(), addr.as_bytes()].concat()
}

fn address_first_key(prefix: &[u8], addr: &Address, height: u64) -> Vec<u8> {
    [prefix, addr.as_bytes(), &height.to_be_bytes()].concat()
}

impl Store {
    pub fn add_incentive_record(&mut self, height: u64, addr: &Address, amount: &Currency) {
        self.add_record(INCENTIVE_HEIGHT, INCENTIVE_ADDRESS, height, addr, amount);
    }

    pub fn add_penalty_record(&mut self, height: u64, addr: &Address, amount: &Currency) {
        self.add_record(PENALTY_HEIGHT, PENALTY_ADDRESS, height, addr, amount);
    }

    fn add_record(
        &mut self,
        height_prefix: &[u8],
        address_prefix: &[u8],
        height: u64,
        addr: &Address,
        amount: &Currency,
    ) {
        let body = serde_json::to_vec(amount).expect("currency serializes infallibly");
        self.incentive
            .set(&height_first_key(height_prefix, height, addr), &body);
        self.incentive
            .set(&address_first_key(address_prefix, addr, height), &body);
    }

    /// All incentives paid at a height, in address order.
    pub fn block_incentives(&self, height: u64) -> Vec<(Address, Currency)> {
        let prefix = [INCENTIVE_HEIGHT, &height.to_be_bytes()[..]].concat();
        self.incentive
            .scan_prefix(&prefix, false)
            .into_iter()
            .filter_map(|(key, value)| {
                let addr = Address::from_slice(&key[prefix.len()..])?;
                let amount = serde_json::from_slice(&value).ok()?;
                Some((addr, amount))
            })
            .collect()
    }

    /// All incentives paid to an address, ascending by height.
    pub fn address_incentives(&self, addr: &Address) -> Vec<(u64, Currency)> {
        let prefix = [INCENTIVE_ADDRESS, addr.as_bytes()].concat();
        self.incentive
            .scan_prefix(&prefix, false)
            .into_iter()
            .filter_map(|(key, value)| {
                let height =
                    u64::from_be_bytes(key[prefix.len()..].try_into().ok()?);
                let amount = serde_json::from_slice(&value).ok()?;
                Some((height, amount))
            })
            .collect()
    }

    pub fn get_incentive(&self, height: u64, addr: &Address) -> Option<Currency> {
        let body = self
            .incentive
            .get(&height_first_key(INCENTIVE_HEIGHT, height, addr))?;
        serde_json::from_slice(&body).ok()
    }

    pub fn block_penalties(&self, height: u64) -> Vec<(Address, Currency)> {
        let prefix = [PENALTY_HEIGHT, &height.to_be_bytes()[..]].concat();
        self.incentive
            .scan_prefix(&prefix, false)
            .into_iter()
            .filter_map(|(key, value)| {
                let addr = Address::from_slice(&key[prefix.len()..])?;
                let amount = serde_json::from_slice(&value).ok()?;
                Some((addr, amount))
            })
            .collect()
    }

    pub fn get_penalty(&self, height: u64, addr: &Address) -> Option<Currency> {
        let body = self
            .incentive
            .get(&height_first_key(PENALTY_HEIGHT, height, addr))?;
        serde_json::from_slice(&body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{addr, store};
    use amo_types::Currency;

    #[test]
    fn records_are_visible_both_ways() {
        let mut s = store();
        s.add_incentive_record(10, &addr(1), &Currency::from(55));
        s.add_incentive_record(11, &addr(1), &Currency::from(66));
        s.add_incentive_record(10, &addr(2), &Currency::from(77));

        assert_eq!(
            s.block_incentives(10),
            vec![(addr(1), Currency::from(55)), (addr(2), Currency::from(77))]
        );
        assert_eq!(
            s.address_incentives(&addr(1)),
            vec![(10, Currency::from(55)), (11, Currency::from(66))]
        );
        assert_eq!(s.get_incentive(11, &addr(1)), Some(Currency::from(66)));
        assert_eq!(s.get_incentive(12, &addr(1)), None);
    }

    #[test]
    fn penalties_are_separate_from_incentives() {
        let mut s = store();
        s.add_penalty_record(5, &addr(1), &Currency::from(9));
        assert!(s.block_incentives(5).is_empty());
        assert_eq!(s.get_penalty(5, &addr(1)), Some(Currency::from(9)));
    }
}
