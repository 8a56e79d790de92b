//! Address-space dispatcher.
//!
//! The bus owns its devices and routes every access by scanning bindings in
//! registration order. For each binding it first checks whether the whole
//! access fits, then whether the first byte does; the first binding to pass
//! either check serves the access. A partially covered access is split: the
//! covered prefix goes to the device, the rest is resubmitted to the bus and
//! scanned again from the first binding. Addresses no binding covers read as
//! zero and swallow writes.

/// Registered device bindings and their address-range checks.
pub mod binding;
/// Access widths and boundary split planning.
pub mod split;

pub use binding::BindingInfo;
pub use split::{prefix_chunks, remainder_chunks, Chunk, PrefixChunks, RemainderChunks, Width};

use std::fmt;

use binding::Binding;

use crate::device::{Address, BusDevice, BusId};
use crate::trace::{TraceEvent, TraceSink};

/// First binding that maps an address, and how much of the access it covers.
struct Route {
    index: usize,
    local: Address,
    covered: u8,
}

/// Address-space dispatcher owning a set of devices.
pub struct Bus {
    id: BusId,
    bindings: Vec<Binding>,
    trace: Option<Box<dyn TraceSink>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("bindings", &self.bindings().collect::<Vec<_>>())
            .field("tracing", &self.trace.is_some())
            .finish()
    }
}

impl Bus {
    /// Creates an empty bus with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: BusId::next(),
            bindings: Vec::new(),
            trace: None,
        }
    }

    /// Identity handed to devices as their back-reference.
    #[must_use]
    pub const fn id(&self) -> BusId {
        self.id
    }

    /// Takes ownership of `device` and maps it at `address`.
    ///
    /// Overlap with existing bindings is allowed; earlier bindings keep
    /// priority for every address they cover.
    pub fn connect<D>(&mut self, address: Address, device: D) -> &mut Self
    where
        D: BusDevice + 'static,
    {
        self.connect_boxed(address, Box::new(device))
    }

    /// Boxed form of [`Bus::connect`].
    pub fn connect_boxed(&mut self, address: Address, device: Box<dyn BusDevice>) -> &mut Self {
        if let Err(owner) = device.link().attach(self.id) {
            log::warn!(
                "{}: device mapped at {address:#x} already belongs to {owner}",
                self.id
            );
        }
        let binding = Binding::new(address, device);
        let info = binding.info(self.bindings.len());
        log::debug!(
            "{}: binding {} mapped at {:#x}..{:#x} ({} bytes)",
            self.id,
            info.index,
            info.start,
            info.end,
            info.size()
        );
        self.bindings.push(binding);
        self
    }

    /// Ticks every device once, in registration order.
    pub fn tick(&mut self) {
        for binding in &mut self.bindings {
            binding.device_mut().tick();
        }
    }

    /// Resets every device once, in registration order.
    pub fn reset(&mut self) {
        for binding in &mut self.bindings {
            binding.device_mut().reset();
        }
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` when no device is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings in registration order.
    pub fn bindings(&self) -> impl Iterator<Item = BindingInfo> + '_ {
        self.bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| binding.info(index))
    }

    /// First binding covering `address`, i.e. the one a byte access would hit.
    #[must_use]
    pub fn binding_at(&self, address: Address) -> Option<BindingInfo> {
        self.route(address, Width::Byte)
            .map(|route| self.bindings[route.index].info(route.index))
    }

    /// Borrows the device of binding `index`.
    #[must_use]
    pub fn device(&self, index: usize) -> Option<&dyn BusDevice> {
        self.bindings.get(index).map(Binding::device)
    }

    /// Mutably borrows the device of binding `index`.
    pub fn device_mut(&mut self, index: usize) -> Option<&mut (dyn BusDevice + 'static)> {
        self.bindings.get_mut(index).map(Binding::device_mut)
    }

    /// Installs a trace sink, returning the previous one.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) -> Option<Box<dyn TraceSink>> {
        self.trace.replace(sink)
    }

    /// Removes and returns the trace sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace.take()
    }

    /// Reads one byte.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read8(&mut self, address: Address) -> u8 {
        self.read(address, Width::Byte) as u8
    }

    /// Reads a little-endian 16-bit value.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read16(&mut self, address: Address) -> u16 {
        self.read(address, Width::Half) as u16
    }

    /// Reads a little-endian 32-bit value.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read32(&mut self, address: Address) -> u32 {
        self.read(address, Width::Word) as u32
    }

    /// Reads a little-endian 64-bit value.
    pub fn read64(&mut self, address: Address) -> u64 {
        self.read(address, Width::Double)
    }

    /// Writes one byte.
    pub fn write8(&mut self, address: Address, data: u8) {
        self.write(address, Width::Byte, u64::from(data));
    }

    /// Writes a little-endian 16-bit value.
    pub fn write16(&mut self, address: Address, data: u16) {
        self.write(address, Width::Half, u64::from(data));
    }

    /// Writes a little-endian 32-bit value.
    pub fn write32(&mut self, address: Address, data: u32) {
        self.write(address, Width::Word, u64::from(data));
    }

    /// Writes a little-endian 64-bit value.
    pub fn write64(&mut self, address: Address, data: u64) {
        self.write(address, Width::Double, data);
    }

    /// Reads `width` bytes at `address`, zero-extended to 64 bits.
    pub fn read(&mut self, address: Address, width: Width) -> u64 {
        let Some(route) = self.route(address, width) else {
            self.open_bus(address, width, false);
            return 0;
        };

        if route.covered == width.bytes() {
            return self.device_read(route.index, route.local, width);
        }

        let mut value = 0;
        for chunk in prefix_chunks(route.covered) {
            let local = route.local.wrapping_add(Address::from(chunk.offset));
            value |= self.device_read(route.index, local, chunk.width) << chunk.shift();
        }
        for chunk in remainder_chunks(route.covered, width) {
            let next = address.wrapping_add(Address::from(chunk.offset));
            value |= self.read(next, chunk.width) << chunk.shift();
        }
        value
    }

    /// Writes the low `width` bytes of `value` at `address`.
    pub fn write(&mut self, address: Address, width: Width, value: u64) {
        let value = value & width.mask();
        let Some(route) = self.route(address, width) else {
            self.open_bus(address, width, true);
            return;
        };

        if route.covered == width.bytes() {
            self.device_write(route.index, route.local, width, value);
            return;
        }

        for chunk in prefix_chunks(route.covered) {
            let local = route.local.wrapping_add(Address::from(chunk.offset));
            let part = (value >> chunk.shift()) & chunk.width.mask();
            self.device_write(route.index, local, chunk.width, part);
        }
        for chunk in remainder_chunks(route.covered, width) {
            let next = address.wrapping_add(Address::from(chunk.offset));
            let part = (value >> chunk.shift()) & chunk.width.mask();
            self.write(next, chunk.width, part);
        }
    }

    fn route(&self, address: Address, width: Width) -> Option<Route> {
        self.bindings
            .iter()
            .enumerate()
            .find_map(|(index, binding)| {
                let covered = binding.coverage(address, width.bytes());
                (covered > 0).then(|| Route {
                    index,
                    local: binding.local(address),
                    covered,
                })
            })
    }

    fn device_read(&mut self, index: usize, local: Address, width: Width) -> u64 {
        let value = self.bindings[index].read(local, width);
        self.emit(TraceEvent::DeviceAccess {
            binding: index,
            local,
            width,
            value,
            is_write: false,
        });
        value
    }

    fn device_write(&mut self, index: usize, local: Address, width: Width, value: u64) {
        self.bindings[index].write(local, width, value);
        self.emit(TraceEvent::DeviceAccess {
            binding: index,
            local,
            width,
            value,
            is_write: true,
        });
    }

    fn open_bus(&mut self, address: Address, width: Width, is_write: bool) {
        log::trace!(
            "{}: open-bus {} {width} at {address:#x}",
            self.id,
            if is_write { "write" } else { "read" }
        );
        self.emit(TraceEvent::OpenBus {
            address,
            width,
            is_write,
        });
    }

    fn emit(&mut self, event: TraceEvent) {
        if let Some(sink) = self.trace.as_mut() {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{Bus, Width};
    use crate::device::{Address, BusDevice, BusLink};
    use crate::trace::{TraceEvent, TraceSink};

    /// Byte-granular memory whose cells stay observable after the bus takes it.
    struct Cells {
        cells: Rc<RefCell<Vec<u8>>>,
        link: BusLink,
    }

    fn cells(size: usize) -> (Cells, Rc<RefCell<Vec<u8>>>) {
        let shared = Rc::new(RefCell::new(vec![0; size]));
        (
            Cells {
                cells: Rc::clone(&shared),
                link: BusLink::new(),
            },
            shared,
        )
    }

    impl BusDevice for Cells {
        fn size(&self) -> Address {
            self.cells.borrow().len() as Address
        }

        fn link(&self) -> &BusLink {
            &self.link
        }

        fn read8(&mut self, addr: Address) -> u8 {
            self.cells.borrow()[usize::try_from(addr).expect("local address fits usize")]
        }

        fn write8(&mut self, addr: Address, data: u8) {
            self.cells.borrow_mut()[usize::try_from(addr).expect("local address fits usize")] =
                data;
        }
    }

    #[derive(Default, Clone)]
    struct Recorder(Rc<RefCell<Vec<TraceEvent>>>);

    impl TraceSink for Recorder {
        fn on_event(&mut self, event: TraceEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn empty_bus_is_open_everywhere() {
        let mut bus = Bus::new();
        assert!(bus.is_empty());
        assert_eq!(bus.read8(0), 0);
        assert_eq!(bus.read64(0x1234), 0);
        bus.write32(0x10, 0xDEAD_BEEF);
        assert_eq!(bus.read32(0x10), 0);
        assert_eq!(bus.binding_at(0x10), None);
    }

    #[test]
    fn connect_is_chainable_and_sets_back_reference() {
        let (a, _) = cells(4);
        let (b, _) = cells(4);
        let mut bus = Bus::new();
        bus.connect(0, a).connect(4, b);

        assert_eq!(bus.len(), 2);
        for index in 0..2 {
            let device = bus.device(index).expect("binding exists");
            assert_eq!(device.bus(), Some(bus.id()));
        }
        assert!(bus.device(2).is_none());
    }

    #[test]
    fn each_bus_has_its_own_identity() {
        let first = Bus::new();
        let second = Bus::default();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn straddling_read_is_served_by_two_devices() {
        let (a, a_cells) = cells(4);
        let (b, b_cells) = cells(4);
        a_cells.borrow_mut().copy_from_slice(&[0x00, 0x11, 0x22, 0x33]);
        b_cells.borrow_mut().copy_from_slice(&[0x44, 0x55, 0x66, 0x77]);

        let mut bus = Bus::new();
        bus.connect(0, a).connect(4, b);

        assert_eq!(bus.read16(3), 0x4433);
        assert_eq!(bus.read32(1), 0x4433_2211);
        assert_eq!(bus.read64(0), 0x7766_5544_3322_1100);
        assert_eq!(bus.read64(2), 0x0000_7766_5544_3322);
    }

    #[test]
    fn binding_at_reports_first_covering_binding() {
        let (a, _) = cells(16);
        let (b, _) = cells(16);
        let mut bus = Bus::new();
        bus.connect(0, a).connect(8, b);

        assert_eq!(bus.binding_at(10).map(|info| info.index), Some(0));
        assert_eq!(bus.binding_at(16).map(|info| info.index), Some(1));
        assert_eq!(bus.binding_at(24), None);
    }

    #[test]
    fn trace_reports_split_pieces_and_open_bus() {
        let (a, _) = cells(4);
        let mut bus = Bus::new();
        bus.connect(0, a);
        let recorder = Recorder::default();
        assert!(bus.set_trace_sink(Box::new(recorder.clone())).is_none());

        bus.write32(2, 0xAABB_CCDD);

        assert_eq!(
            *recorder.0.borrow(),
            vec![
                TraceEvent::DeviceAccess {
                    binding: 0,
                    local: 2,
                    width: Width::Half,
                    value: 0xCCDD,
                    is_write: true,
                },
                TraceEvent::OpenBus {
                    address: 4,
                    width: Width::Half,
                    is_write: true,
                },
            ]
        );
        assert!(bus.take_trace_sink().is_some());
        bus.read8(0x100);
        assert_eq!(recorder.0.borrow().len(), 2);
    }

    #[test]
    fn device_mut_reaches_the_bound_device() {
        let (a, a_cells) = cells(2);
        let mut bus = Bus::new();
        bus.connect(0x40, a);

        bus.device_mut(0)
            .expect("binding exists")
            .write16(0, 0xBEEF);
        assert_eq!(*a_cells.borrow(), vec![0xEF, 0xBE]);
        assert_eq!(bus.read16(0x40), 0xBEEF);
    }

    #[test]
    fn debug_lists_bindings() {
        let (a, _) = cells(2);
        let mut bus = Bus::new();
        bus.connect(0x40, a);
        let rendered = format!("{bus:?}");
        assert!(rendered.contains("start: 64"));
        assert!(rendered.contains("end: 66"));
    }
}
