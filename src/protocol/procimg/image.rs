use serde::{Deserialize, Serialize};

use crate::protocol::error::{ModbusError, ModbusResult};

/// The four data tables a unit exposes: coils (digital outputs), discrete
/// inputs (digital inputs), input registers and holding registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessImage {
    #[serde(default)]
    pub coils: Vec<bool>,
    #[serde(default)]
    pub discrete_inputs: Vec<bool>,
    #[serde(default)]
    pub input_registers: Vec<u16>,
    #[serde(default)]
    pub holding_registers: Vec<u16>,
}

fn get<T: Copy>(table: &[T], offset: usize) -> ModbusResult<T> {
    table.get(offset).copied().ok_or(ModbusError::IllegalAddress {
        offset,
        count: 1,
        len: table.len(),
    })
}

fn set<T>(table: &mut [T], offset: usize, value: T) -> ModbusResult<()> {
    let len = table.len();
    let slot = table.get_mut(offset).ok_or(ModbusError::IllegalAddress {
        offset,
        count: 1,
        len,
    })?;
    *slot = value;
    Ok(())
}

fn remove<T>(table: &mut Vec<T>, offset: usize) -> ModbusResult<T> {
    if offset >= table.len() {
        return Err(ModbusError::IllegalAddress {
            offset,
            count: 1,
            len: table.len(),
        });
    }
    Ok(table.remove(offset))
}

fn range<T>(table: &[T], offset: usize, count: usize) -> ModbusResult<&[T]> {
    offset
        .checked_add(count)
        .and_then(|end| table.get(offset..end))
        .ok_or(ModbusError::IllegalAddress {
            offset,
            count,
            len: table.len(),
        })
}

fn range_mut<T>(table: &mut [T], offset: usize, count: usize) -> ModbusResult<&mut [T]> {
    let len = table.len();
    let end = offset
        .checked_add(count)
        .filter(|end| *end <= len)
        .ok_or(ModbusError::IllegalAddress { offset, count, len })?;
    Ok(&mut table[offset..end])
}

impl ProcessImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_registers(mut self, values: impl IntoIterator<Item = u16>) -> Self {
        self.input_registers.extend(values);
        self
    }

    pub fn with_holding_registers(mut self, values: impl IntoIterator<Item = u16>) -> Self {
        self.holding_registers.extend(values);
        self
    }

    pub fn with_coils(mut self, values: impl IntoIterator<Item = bool>) -> Self {
        self.coils.extend(values);
        self
    }

    pub fn with_discrete_inputs(mut self, values: impl IntoIterator<Item = bool>) -> Self {
        self.discrete_inputs.extend(values);
        self
    }

    pub fn coil(&self, offset: usize) -> ModbusResult<bool> {
        get(&self.coils, offset)
    }

    pub fn set_coil(&mut self, offset: usize, value: bool) -> ModbusResult<()> {
        set(&mut self.coils, offset, value)
    }

    pub fn add_coil(&mut self, value: bool) {
        self.coils.push(value);
    }

    pub fn remove_coil(&mut self, offset: usize) -> ModbusResult<bool> {
        remove(&mut self.coils, offset)
    }

    pub fn coil_range(&self, offset: usize, count: usize) -> ModbusResult<&[bool]> {
        range(&self.coils, offset, count)
    }

    pub fn coil_count(&self) -> usize {
        self.coils.len()
    }

    pub fn discrete_input(&self, offset: usize) -> ModbusResult<bool> {
        get(&self.discrete_inputs, offset)
    }

    pub fn set_discrete_input(&mut self, offset: usize, value: bool) -> ModbusResult<()> {
        set(&mut self.discrete_inputs, offset, value)
    }

    pub fn add_discrete_input(&mut self, value: bool) {
        self.discrete_inputs.push(value);
    }

    pub fn remove_discrete_input(&mut self, offset: usize) -> ModbusResult<bool> {
        remove(&mut self.discrete_inputs, offset)
    }

    pub fn discrete_input_range(&self, offset: usize, count: usize) -> ModbusResult<&[bool]> {
        range(&self.discrete_inputs, offset, count)
    }

    pub fn discrete_input_count(&self) -> usize {
        self.discrete_inputs.len()
    }

    pub fn input_register(&self, offset: usize) -> ModbusResult<u16> {
        get(&self.input_registers, offset)
    }

    pub fn set_input_register(&mut self, offset: usize, value: u16) -> ModbusResult<()> {
        set(&mut self.input_registers, offset, value)
    }

    pub fn add_input_register(&mut self, value: u16) {
        self.input_registers.push(value);
    }

    pub fn remove_input_register(&mut self, offset: usize) -> ModbusResult<u16> {
        remove(&mut self.input_registers, offset)
    }

    pub fn input_register_range(&self, offset: usize, count: usize) -> ModbusResult<&[u16]> {
        range(&self.input_registers, offset, count)
    }

    pub fn input_register_count(&self) -> usize {
        self.input_registers.len()
    }

    pub fn holding_register(&self, offset: usize) -> ModbusResult<u16> {
        get(&self.holding_registers, offset)
    }

    pub fn set_holding_register(&mut self, offset: usize, value: u16) -> ModbusResult<()> {
        set(&mut self.holding_registers, offset, value)
    }

    pub fn add_holding_register(&mut self, value: u16) {
        self.holding_registers.push(value);
    }

    pub fn remove_holding_register(&mut self, offset: usize) -> ModbusResult<u16> {
        remove(&mut self.holding_registers, offset)
    }

    pub fn holding_register_range(&self, offset: usize, count: usize) -> ModbusResult<&[u16]> {
        range(&self.holding_registers, offset, count)
    }

    pub fn holding_register_count(&self) -> usize {
        self.holding_registers.len()
    }

    /// Overwrites `values.len()` coils starting at `offset`, or none at all.
    pub fn write_coils(&mut self, offset: usize, values: &[bool]) -> ModbusResult<()> {
        range_mut(&mut self.coils, offset, values.len())?.copy_from_slice(values);
        Ok(())
    }

    /// Overwrites `values.len()` holding registers starting at `offset`, or none at all.
    pub fn write_holding_registers(&mut self, offset: usize, values: &[u16]) -> ModbusResult<()> {
        range_mut(&mut self.holding_registers, offset, values.len())?.copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_checked() {
        let mut image = ProcessImage::new().with_input_registers([45; 13]);
        assert_eq!(image.input_register(12).unwrap(), 45);
        assert!(matches!(
            image.input_register(13),
            Err(ModbusError::IllegalAddress { offset: 13, len: 13, .. })
        ));
        assert!(image.input_register_range(10, 4).is_err());
        assert_eq!(image.input_register_range(10, 3).unwrap(), &[45, 45, 45]);
        assert!(image.input_register_range(usize::MAX, 2).is_err());
        assert!(image.set_coil(0, true).is_err());
    }

    #[test]
    fn test_add_and_remove_shift_offsets() {
        let mut image = ProcessImage::new();
        image.add_holding_register(1);
        image.add_holding_register(2);
        image.add_holding_register(3);
        assert_eq!(image.remove_holding_register(0).unwrap(), 1);
        assert_eq!(image.holding_register(0).unwrap(), 2);
        assert_eq!(image.holding_register_count(), 2);
        assert!(image.remove_holding_register(5).is_err());
    }

    #[test]
    fn test_block_writes_are_all_or_nothing() {
        let mut image = ProcessImage::new().with_coils([false; 4]);
        assert!(image.write_coils(2, &[true, true, true]).is_err());
        assert_eq!(image.coil_range(0, 4).unwrap(), &[false; 4]);
        image.write_coils(1, &[true, true]).unwrap();
        assert_eq!(image.coil_range(0, 4).unwrap(), &[false, true, true, false]);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let image: ProcessImage = toml::from_str(
            r#"
            input_registers = [45, 46]
            coils = [true]
            "#,
        )
        .unwrap();
        assert_eq!(image.input_register_count(), 2);
        assert!(image.coil(0).unwrap());
        assert!(image.holding_registers.is_empty());
    }
}
