//! Latest-value store for I/O signals with dirty tracking.
//!
//! Each side keeps the current value of every outgoing signal it produces
//! and every incoming signal its peer produces. A step transmits only the
//! signals whose value changed since the last transmission; the receiving
//! side fires the change callback for each transmitted signal.

use std::collections::HashMap;

use cosim_channel::{ChannelReader, ChannelWriter};

use crate::callbacks::Callbacks;
use crate::error::{CoSimError, Result};
use crate::protocol::MAX_SIGNAL_COUNT;
use crate::types::{IoSignal, IoSignalId, SimulationTime, SizeKind};

#[derive(Debug)]
struct SignalSlot {
    signal: IoSignal,
    data: Vec<u8>,
    /// Current element count. Fixed signals always carry the full length.
    length: u32,
    dirty: bool,
}

impl SignalSlot {
    fn new(signal: IoSignal) -> Result<Self> {
        if signal.length == 0 {
            return Err(CoSimError::InvalidLength {
                signal_id: signal.id,
                length: 0,
            });
        }
        let length = match signal.size_kind {
            SizeKind::Fixed => signal.length,
            SizeKind::Variable => 0,
        };
        let data = vec![0u8; signal.size_in_bytes()];
        Ok(Self {
            signal,
            data,
            length,
            dirty: false,
        })
    }

    fn byte_length(&self) -> usize {
        self.length as usize * self.signal.data_type.size()
    }

    fn reset(&mut self) {
        self.data.fill(0);
        self.length = match self.signal.size_kind {
            SizeKind::Fixed => self.signal.length,
            SizeKind::Variable => 0,
        };
        self.dirty = false;
    }
}

/// Per-side buffer of incoming and outgoing signal values.
pub struct IoBuffer {
    incoming: Vec<SignalSlot>,
    outgoing: Vec<SignalSlot>,
    incoming_index: HashMap<IoSignalId, usize>,
    outgoing_index: HashMap<IoSignalId, usize>,
    /// Outgoing slots that became dirty, in dirtying order.
    changed: Vec<usize>,
}

impl IoBuffer {
    /// Build a buffer for the given signal sets.
    ///
    /// Signal ids must be unique across the union of incoming and outgoing
    /// signals. An empty signal set is valid.
    pub fn new(incoming: Vec<IoSignal>, outgoing: Vec<IoSignal>) -> Result<Self> {
        let mut incoming_index = HashMap::with_capacity(incoming.len());
        let mut outgoing_index = HashMap::with_capacity(outgoing.len());

        let mut incoming_slots = Vec::with_capacity(incoming.len());
        for signal in incoming {
            let id = signal.id;
            if incoming_index.insert(id, incoming_slots.len()).is_some() {
                return Err(CoSimError::DuplicateSignalId(id));
            }
            incoming_slots.push(SignalSlot::new(signal)?);
        }

        let mut outgoing_slots = Vec::with_capacity(outgoing.len());
        for signal in outgoing {
            let id = signal.id;
            if incoming_index.contains_key(&id)
                || outgoing_index.insert(id, outgoing_slots.len()).is_some()
            {
                return Err(CoSimError::DuplicateSignalId(id));
            }
            outgoing_slots.push(SignalSlot::new(signal)?);
        }

        Ok(Self {
            incoming: incoming_slots,
            outgoing: outgoing_slots,
            incoming_index,
            outgoing_index,
            changed: Vec::new(),
        })
    }

    /// Update the outgoing value of signal `id`.
    ///
    /// `length` is the element count; `data` must hold exactly
    /// `length × element width` bytes. The slot only becomes dirty when the
    /// bytes differ from the stored value, or, for variable size signals,
    /// when the length differs.
    pub fn write(&mut self, id: IoSignalId, length: u32, data: &[u8]) -> Result<()> {
        let index = *self
            .outgoing_index
            .get(&id)
            .ok_or(CoSimError::UnknownSignal(id))?;
        let slot = &mut self.outgoing[index];

        match slot.signal.size_kind {
            SizeKind::Fixed => {
                if length != slot.signal.length {
                    return Err(CoSimError::InvalidLength {
                        signal_id: id,
                        length,
                    });
                }
            }
            SizeKind::Variable => {
                if length > slot.signal.length {
                    return Err(CoSimError::VariableLengthExceeded {
                        signal_id: id,
                        length,
                        maximum: slot.signal.length,
                    });
                }
            }
        }

        let byte_length = length as usize * slot.signal.data_type.size();
        if data.len() != byte_length {
            return Err(CoSimError::InvalidLength {
                signal_id: id,
                length,
            });
        }

        let changed = slot.length != length || slot.data[..byte_length] != *data;
        if !changed {
            return Ok(());
        }

        slot.data[..byte_length].copy_from_slice(data);
        slot.length = length;
        if !slot.dirty {
            slot.dirty = true;
            self.changed.push(index);
        }
        Ok(())
    }

    /// Read the latest value of signal `id`.
    ///
    /// Incoming signals reflect the last received value; outgoing signals
    /// the last written one. Returns the element count and the value bytes.
    pub fn read(&self, id: IoSignalId) -> Result<(u32, &[u8])> {
        let slot = if let Some(&index) = self.incoming_index.get(&id) {
            &self.incoming[index]
        } else if let Some(&index) = self.outgoing_index.get(&id) {
            &self.outgoing[index]
        } else {
            return Err(CoSimError::UnknownSignal(id));
        };
        Ok((slot.length, &slot.data[..slot.byte_length()]))
    }

    /// The signal descriptors this side receives.
    pub fn incoming_signals(&self) -> impl Iterator<Item = &IoSignal> {
        self.incoming.iter().map(|slot| &slot.signal)
    }

    /// The signal descriptors this side produces.
    pub fn outgoing_signals(&self) -> impl Iterator<Item = &IoSignal> {
        self.outgoing.iter().map(|slot| &slot.signal)
    }

    /// Emit all dirty outgoing signals and clear their dirty flags.
    pub fn serialize(&mut self, writer: &mut ChannelWriter) -> Result<()> {
        writer.write_u32(self.changed.len() as u32)?;
        for &index in &self.changed {
            let slot = &self.outgoing[index];
            writer.write_u32(slot.signal.id.0)?;
            if slot.signal.size_kind == SizeKind::Variable {
                writer.write_u32(slot.length)?;
            }
            writer.write(&slot.data[..slot.byte_length()])?;
        }

        for index in self.changed.drain(..) {
            self.outgoing[index].dirty = false;
        }
        Ok(())
    }

    /// Apply a received signal snapshot and fire the change callback per
    /// entry, in wire order.
    pub fn deserialize(
        &mut self,
        reader: &mut ChannelReader,
        simulation_time: SimulationTime,
        callbacks: &mut Callbacks,
    ) -> Result<()> {
        let count = reader.read_u32()?;
        if count > MAX_SIGNAL_COUNT {
            return Err(CoSimError::Protocol(format!(
                "changed signal count {count} exceeds limit {MAX_SIGNAL_COUNT}"
            )));
        }

        for _ in 0..count {
            let id = IoSignalId(reader.read_u32()?);
            let index = *self.incoming_index.get(&id).ok_or_else(|| {
                CoSimError::Protocol(format!("received value for unknown IO signal {id}"))
            })?;
            let slot = &mut self.incoming[index];

            let length = match slot.signal.size_kind {
                SizeKind::Fixed => slot.signal.length,
                SizeKind::Variable => {
                    let length = reader.read_u32()?;
                    if length > slot.signal.length {
                        return Err(CoSimError::Protocol(format!(
                            "received length {length} exceeds maximum {} of IO signal {id}",
                            slot.signal.length
                        )));
                    }
                    length
                }
            };

            let byte_length = length as usize * slot.signal.data_type.size();
            reader.read(&mut slot.data[..byte_length])?;
            slot.length = length;

            if let Some(callback) = callbacks.incoming_signal_changed.as_mut() {
                callback(
                    simulation_time,
                    &slot.signal,
                    length,
                    &slot.data[..byte_length],
                );
            }
        }
        Ok(())
    }

    /// Zero all values, reset lengths, and clear dirty state.
    pub fn clear_data(&mut self) {
        for slot in self.incoming.iter_mut().chain(self.outgoing.iter_mut()) {
            slot.reset();
        }
        self.changed.clear();
    }
}
