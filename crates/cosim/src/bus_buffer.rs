//! Bounded per-controller queues for CAN, Ethernet, and LIN messages.
//!
//! The three bus kinds share one parametric queue implementation; the
//! concrete kinds differ only in their message layout, payload bound, and
//! flag semantics. Extensions hold no reference back to the owning buffer:
//! the callback set is passed into the operations that need it.

use std::collections::{HashMap, VecDeque};

use cosim_channel::{ChannelReader, ChannelWriter};

use crate::callbacks::Callbacks;
use crate::error::{CoSimError, Result};
use crate::logging::log_warning;
use crate::protocol::MAX_BUS_MESSAGE_COUNT;
use crate::ring_buffer::RingBuffer;
use crate::types::{
    BusControllerId, CanController, CanMessage, CanMessageFlags, EthController, EthMessage,
    EthMessageFlags, LinController, LinMessage, LinMessageFlags, SimulationTime,
    CAN_MESSAGE_MAX_LENGTH, ETH_MESSAGE_MAX_LENGTH, LIN_MESSAGE_MAX_LENGTH,
};

/// Queue size used when a controller does not specify one.
pub const DEFAULT_QUEUE_SIZE: u32 = 100;

/// Wire codec and queue bounds of one bus message kind.
pub(crate) trait BusMessage: Clone {
    const MAX_DATA_LENGTH: usize;

    fn controller_id(&self) -> BusControllerId;
    fn serialize(&self, writer: &mut ChannelWriter) -> Result<()>;
    fn deserialize(reader: &mut ChannelReader) -> Result<Self>;
}

/// The descriptor fields the queues need from any controller kind.
pub(crate) trait BusControllerInfo: Clone {
    fn id(&self) -> BusControllerId;
    fn queue_size(&self) -> u32;
    fn name(&self) -> &str;
}

impl BusControllerInfo for CanController {
    fn id(&self) -> BusControllerId {
        self.id
    }

    fn queue_size(&self) -> u32 {
        self.queue_size
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl BusControllerInfo for EthController {
    fn id(&self) -> BusControllerId {
        self.id
    }

    fn queue_size(&self) -> u32 {
        self.queue_size
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl BusControllerInfo for LinController {
    fn id(&self) -> BusControllerId {
        self.id
    }

    fn queue_size(&self) -> u32 {
        self.queue_size
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl BusMessage for CanMessage {
    const MAX_DATA_LENGTH: usize = CAN_MESSAGE_MAX_LENGTH;

    fn controller_id(&self) -> BusControllerId {
        self.controller_id
    }

    fn serialize(&self, writer: &mut ChannelWriter) -> Result<()> {
        writer.write_u32(self.controller_id.0)?;
        writer.write_u32(self.id)?;
        writer.write_i64(self.timestamp)?;
        writer.write_u32(self.flags.bits())?;
        writer.write_u32(self.length)?;
        writer.write(&self.data[..self.length as usize])?;
        Ok(())
    }

    fn deserialize(reader: &mut ChannelReader) -> Result<Self> {
        let controller_id = BusControllerId(reader.read_u32()?);
        let id = reader.read_u32()?;
        let timestamp = reader.read_i64()?;
        let flags = CanMessageFlags::from_bits_retain(reader.read_u32()?);
        let length = read_message_length::<Self>(reader)?;
        let mut data = [0u8; CAN_MESSAGE_MAX_LENGTH];
        reader.read(&mut data[..length as usize])?;
        Ok(Self {
            controller_id,
            id,
            timestamp,
            flags,
            length,
            data,
        })
    }
}

impl BusMessage for EthMessage {
    const MAX_DATA_LENGTH: usize = ETH_MESSAGE_MAX_LENGTH;

    fn controller_id(&self) -> BusControllerId {
        self.controller_id
    }

    fn serialize(&self, writer: &mut ChannelWriter) -> Result<()> {
        writer.write_u32(self.controller_id.0)?;
        writer.write_i64(self.timestamp)?;
        writer.write_u32(self.flags.bits())?;
        writer.write_u32(self.length)?;
        writer.write(&self.data[..self.length as usize])?;
        Ok(())
    }

    fn deserialize(reader: &mut ChannelReader) -> Result<Self> {
        let controller_id = BusControllerId(reader.read_u32()?);
        let timestamp = reader.read_i64()?;
        let flags = EthMessageFlags::from_bits_retain(reader.read_u32()?);
        let length = read_message_length::<Self>(reader)?;
        let mut data = [0u8; ETH_MESSAGE_MAX_LENGTH];
        reader.read(&mut data[..length as usize])?;
        Ok(Self {
            controller_id,
            timestamp,
            flags,
            length,
            data,
        })
    }
}

impl BusMessage for LinMessage {
    const MAX_DATA_LENGTH: usize = LIN_MESSAGE_MAX_LENGTH;

    fn controller_id(&self) -> BusControllerId {
        self.controller_id
    }

    fn serialize(&self, writer: &mut ChannelWriter) -> Result<()> {
        writer.write_u32(self.controller_id.0)?;
        writer.write_u32(self.id)?;
        writer.write_i64(self.timestamp)?;
        writer.write_u32(self.flags.bits())?;
        writer.write_u32(self.length)?;
        writer.write(&self.data[..self.length as usize])?;
        Ok(())
    }

    fn deserialize(reader: &mut ChannelReader) -> Result<Self> {
        let controller_id = BusControllerId(reader.read_u32()?);
        let id = reader.read_u32()?;
        let timestamp = reader.read_i64()?;
        let flags = LinMessageFlags::from_bits_retain(reader.read_u32()?);
        let length = read_message_length::<Self>(reader)?;
        let mut data = [0u8; LIN_MESSAGE_MAX_LENGTH];
        reader.read(&mut data[..length as usize])?;
        Ok(Self {
            controller_id,
            id,
            timestamp,
            flags,
            length,
            data,
        })
    }
}

fn read_message_length<M: BusMessage>(reader: &mut ChannelReader) -> Result<u32> {
    let length = reader.read_u32()?;
    if length as usize > M::MAX_DATA_LENGTH {
        return Err(CoSimError::Protocol(format!(
            "bus message length {length} exceeds maximum {}",
            M::MAX_DATA_LENGTH
        )));
    }
    Ok(length)
}

#[derive(Debug)]
struct ControllerExtension<C, M> {
    info: C,
    receive_buffer: RingBuffer<M>,
    transmit_buffer: RingBuffer<M>,
    receive_count: u32,
    transmit_count: u32,
    receive_warning_sent: bool,
    transmit_warning_sent: bool,
}

impl<C: BusControllerInfo, M> ControllerExtension<C, M> {
    fn new(info: C) -> Self {
        let queue_size = if info.queue_size() == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            info.queue_size()
        } as usize;
        Self {
            info,
            receive_buffer: RingBuffer::new(queue_size),
            transmit_buffer: RingBuffer::new(queue_size),
            receive_count: 0,
            transmit_count: 0,
            receive_warning_sent: false,
            transmit_warning_sent: false,
        }
    }

    fn clear_data(&mut self) {
        self.receive_buffer.clear();
        self.transmit_buffer.clear();
        self.receive_count = 0;
        self.transmit_count = 0;
        self.receive_warning_sent = false;
        self.transmit_warning_sent = false;
    }
}

/// Queues of one bus kind.
///
/// Per-controller FIFO is kept by the ring buffers; the order queues keep
/// the global FIFO across controllers in the order of `transmit` calls and
/// wire arrival respectively.
struct BusPool<C, M> {
    controllers: HashMap<BusControllerId, ControllerExtension<C, M>>,
    transmit_order: VecDeque<BusControllerId>,
    receive_order: VecDeque<BusControllerId>,
}

impl<C: BusControllerInfo, M: BusMessage> BusPool<C, M> {
    fn new(infos: Vec<C>) -> Result<Self> {
        let mut controllers = HashMap::with_capacity(infos.len());
        for info in infos {
            let id = info.id();
            if controllers.insert(id, ControllerExtension::new(info)).is_some() {
                return Err(CoSimError::DuplicateControllerId(id));
            }
        }
        Ok(Self {
            controllers,
            transmit_order: VecDeque::new(),
            receive_order: VecDeque::new(),
        })
    }

    fn transmit(&mut self, message: M) -> Result<()> {
        let id = message.controller_id();
        let extension = self
            .controllers
            .get_mut(&id)
            .ok_or(CoSimError::UnknownController(id))?;

        if extension.transmit_buffer.is_full() {
            if !extension.transmit_warning_sent {
                log_warning(format!(
                    "Transmit buffer for controller '{}' is full. Messages are dropped.",
                    extension.info.name()
                ));
                extension.transmit_warning_sent = true;
            }
            return Ok(());
        }

        extension.transmit_buffer.push(message);
        extension.transmit_count += 1;
        self.transmit_order.push_back(id);
        Ok(())
    }

    fn receive(&mut self) -> Option<M> {
        while let Some(id) = self.receive_order.pop_front() {
            if let Some(extension) = self.controllers.get_mut(&id) {
                if let Some(message) = extension.receive_buffer.pop() {
                    return Some(message);
                }
            }
        }
        None
    }

    fn serialize(&mut self, writer: &mut ChannelWriter) -> Result<()> {
        writer.write_u32(self.transmit_order.len() as u32)?;
        while let Some(id) = self.transmit_order.pop_front() {
            let Some(extension) = self.controllers.get_mut(&id) else {
                continue;
            };
            let Some(message) = extension.transmit_buffer.pop() else {
                continue;
            };
            message.serialize(writer)?;
        }
        for extension in self.controllers.values_mut() {
            extension.transmit_count = 0;
        }
        Ok(())
    }

    fn deserialize(&mut self, reader: &mut ChannelReader) -> Result<()> {
        let count = reader.read_u32()?;
        if count > MAX_BUS_MESSAGE_COUNT {
            return Err(CoSimError::Protocol(format!(
                "bus message count {count} exceeds limit {MAX_BUS_MESSAGE_COUNT}"
            )));
        }

        for _ in 0..count {
            let message = M::deserialize(reader)?;
            let id = message.controller_id();
            let extension = self
                .controllers
                .get_mut(&id)
                .ok_or(CoSimError::UnknownController(id))?;

            if extension.receive_buffer.is_full() {
                if !extension.receive_warning_sent {
                    log_warning(format!(
                        "Receive buffer for controller '{}' is full. Messages are dropped.",
                        extension.info.name()
                    ));
                    extension.receive_warning_sent = true;
                }
                continue;
            }

            extension.receive_buffer.push(message);
            extension.receive_count += 1;
            self.receive_order.push_back(id);
        }
        Ok(())
    }

    /// Drain the receive queues in FIFO order through `deliver`.
    fn drain_received<F: FnMut(&C, &M)>(&mut self, mut deliver: F) {
        while let Some(id) = self.receive_order.pop_front() {
            if let Some(extension) = self.controllers.get_mut(&id) {
                if let Some(message) = extension.receive_buffer.pop() {
                    deliver(&extension.info, &message);
                }
            }
        }
    }

    fn clear_data(&mut self) {
        for extension in self.controllers.values_mut() {
            extension.clear_data();
        }
        self.transmit_order.clear();
        self.receive_order.clear();
    }
}

/// Per-side buffer of bus messages for all three bus kinds.
pub struct BusBuffer {
    can: BusPool<CanController, CanMessage>,
    eth: BusPool<EthController, EthMessage>,
    lin: BusPool<LinController, LinMessage>,
}

impl BusBuffer {
    /// Build a buffer for the given controller sets.
    ///
    /// Controller ids must be unique within their bus kind. A queue size of
    /// zero falls back to [`DEFAULT_QUEUE_SIZE`].
    pub fn new(
        can_controllers: Vec<CanController>,
        eth_controllers: Vec<EthController>,
        lin_controllers: Vec<LinController>,
    ) -> Result<Self> {
        Ok(Self {
            can: BusPool::new(can_controllers)?,
            eth: BusPool::new(eth_controllers)?,
            lin: BusPool::new(lin_controllers)?,
        })
    }

    /// Queue an outgoing CAN message. A full queue drops the message and
    /// warns once per controller per run.
    pub fn transmit_can(&mut self, message: &CanMessage) -> Result<()> {
        self.can.transmit(*message)
    }

    pub fn transmit_eth(&mut self, message: &EthMessage) -> Result<()> {
        self.eth.transmit(*message)
    }

    pub fn transmit_lin(&mut self, message: &LinMessage) -> Result<()> {
        self.lin.transmit(*message)
    }

    /// Take the next received CAN message, in the order the producer
    /// transmitted them. `None` when no message is pending.
    pub fn receive_can(&mut self) -> Option<CanMessage> {
        self.can.receive()
    }

    pub fn receive_eth(&mut self) -> Option<EthMessage> {
        self.eth.receive()
    }

    pub fn receive_lin(&mut self) -> Option<LinMessage> {
        self.lin.receive()
    }

    /// Emit and drain all transmit queues, in bus kind order CAN,
    /// Ethernet, LIN.
    pub fn serialize(&mut self, writer: &mut ChannelWriter) -> Result<()> {
        self.can.serialize(writer)?;
        self.eth.serialize(writer)?;
        self.lin.serialize(writer)?;
        Ok(())
    }

    /// Decode received messages into the receive queues, then deliver them
    /// through the registered callbacks in FIFO order. Kinds without a
    /// registered callback retain their messages for `receive_*`.
    pub fn deserialize(
        &mut self,
        reader: &mut ChannelReader,
        simulation_time: SimulationTime,
        callbacks: &mut Callbacks,
    ) -> Result<()> {
        self.can.deserialize(reader)?;
        self.eth.deserialize(reader)?;
        self.lin.deserialize(reader)?;

        if let Some(callback) = callbacks.can_message_received.as_mut() {
            self.can
                .drain_received(|info, message| callback(simulation_time, info, message));
        }
        if let Some(callback) = callbacks.eth_message_received.as_mut() {
            self.eth
                .drain_received(|info, message| callback(simulation_time, info, message));
        }
        if let Some(callback) = callbacks.lin_message_received.as_mut() {
            self.lin
                .drain_received(|info, message| callback(simulation_time, info, message));
        }
        Ok(())
    }

    /// Empty all queues and reset counters and warning flags.
    pub fn clear_data(&mut self) {
        self.can.clear_data();
        self.eth.clear_data();
        self.lin.clear_data();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can_controller(id: u32, queue_size: u32) -> CanController {
        CanController {
            id: BusControllerId(id),
            queue_size,
            bits_per_second: 500_000,
            flexible_data_rate_bits_per_second: 2_000_000,
            name: format!("CanController{id}"),
            channel_name: format!("CanChannel{id}"),
            cluster_name: format!("CanCluster{id}"),
        }
    }

    fn can_message(controller_id: u32, id: u32, payload: &[u8]) -> CanMessage {
        let mut data = [0u8; CAN_MESSAGE_MAX_LENGTH];
        data[..payload.len()].copy_from_slice(payload);
        CanMessage {
            controller_id: BusControllerId(controller_id),
            id,
            timestamp: 0,
            flags: CanMessageFlags::empty(),
            length: payload.len() as u32,
            data,
        }
    }

    #[test]
    fn duplicate_controller_ids_rejected() {
        let result = BusBuffer::new(
            vec![can_controller(1, 2), can_controller(1, 2)],
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(CoSimError::DuplicateControllerId(BusControllerId(1)))
        ));
    }

    #[test]
    fn transmit_to_unknown_controller_fails() {
        let mut buffer = BusBuffer::new(Vec::new(), Vec::new(), Vec::new()).unwrap();
        let result = buffer.transmit_can(&can_message(9, 1, &[0x01]));
        assert!(matches!(
            result,
            Err(CoSimError::UnknownController(BusControllerId(9)))
        ));
    }

    #[test]
    fn overflow_drops_excess_messages() {
        let mut buffer =
            BusBuffer::new(vec![can_controller(1, 2)], Vec::new(), Vec::new()).unwrap();

        buffer.transmit_can(&can_message(1, 1, &[0x01])).unwrap();
        buffer.transmit_can(&can_message(1, 2, &[0x02])).unwrap();
        buffer.transmit_can(&can_message(1, 3, &[0x03])).unwrap();

        // Only the first two survive; the third was dropped on overflow.
        assert_eq!(buffer.can.transmit_order.len(), 2);
    }

    #[test]
    fn global_fifo_across_controllers() {
        let mut buffer = BusBuffer::new(
            vec![can_controller(1, 4), can_controller(2, 4)],
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        buffer.transmit_can(&can_message(1, 10, &[0x01])).unwrap();
        buffer.transmit_can(&can_message(2, 20, &[0x02])).unwrap();
        buffer.transmit_can(&can_message(1, 11, &[0x03])).unwrap();

        let order: Vec<BusControllerId> = buffer.can.transmit_order.iter().copied().collect();
        assert_eq!(
            order,
            vec![BusControllerId(1), BusControllerId(2), BusControllerId(1)]
        );
    }

    #[test]
    fn clear_data_resets_queues_and_flags() {
        let mut buffer =
            BusBuffer::new(vec![can_controller(1, 1)], Vec::new(), Vec::new()).unwrap();

        buffer.transmit_can(&can_message(1, 1, &[0x01])).unwrap();
        buffer.transmit_can(&can_message(1, 2, &[0x02])).unwrap(); // dropped
        buffer.clear_data();

        let extension = buffer.can.controllers.get(&BusControllerId(1)).unwrap();
        assert_eq!(extension.transmit_count, 0);
        assert!(!extension.transmit_warning_sent);
        assert!(extension.transmit_buffer.is_empty());
        assert!(buffer.can.transmit_order.is_empty());
    }
}
