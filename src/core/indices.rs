use hashbrown::HashMap;

use crate::types::OpId;

/// Secondary index from a key to operation ids in insertion order.
pub type VecIndex<K> = HashMap<K, Vec<OpId>>;

pub(crate) fn remove_from_vec_index(v: &mut Vec<OpId>, id: &str) {
    if let Some(pos) = v.iter().position(|x| x == id) {
        v.remove(pos);
    }
}
