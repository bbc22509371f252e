use serde::{Deserialize, Serialize};

use acs_formats::{MAP_VAR_COUNT, MAX_SCRIPT_VARS, WORLD_VAR_COUNT};

/// Fixed-size integer variable array.
///
/// Indices come from the decoded image, which refuses out-of-range indices at
/// load time, so accessors take the index as already validated and only fall
/// back to a harmless default if that contract is broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarStore<const N: usize> {
    #[serde(with = "slots")]
    values: [i32; N],
}

pub type WorldVars = VarStore<WORLD_VAR_COUNT>;
pub type MapVars = VarStore<MAP_VAR_COUNT>;
pub type ScriptVars = VarStore<MAX_SCRIPT_VARS>;

impl<const N: usize> Default for VarStore<N> {
    fn default() -> Self {
        VarStore { values: [0; N] }
    }
}

impl<const N: usize> VarStore<N> {
    pub fn get(&self, index: usize) -> i32 {
        self.values.get(index).copied().unwrap_or(0)
    }

    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    pub fn clear(&mut self) {
        self.values = [0; N];
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.values
    }
}

/// Serde only derives fixed arrays up to 32 elements; go through a `Vec`.
mod slots {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, const N: usize>(values: &[i32; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        values.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[i32; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<i32>::deserialize(deserializer)?;
        let len = values.len();
        values
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"a full variable array"))
    }
}
