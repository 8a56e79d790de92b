#![no_main]

use bus_core::{Address, Bus, Ram, Width};
use libfuzzer_sys::fuzz_target;

// Layout: one region count byte, then (base, size) byte pairs, then
// (op, address, value) accesses of 10 bytes each.
fuzz_target!(|data: &[u8]| {
    let Some((&count, rest)) = data.split_first() else {
        return;
    };
    let regions = usize::from(count % 5);
    if rest.len() < regions * 2 {
        return;
    }
    let (layout, accesses) = rest.split_at(regions * 2);

    let mut bus = Bus::new();
    for pair in layout.chunks_exact(2) {
        let size = usize::from(pair[1] % 16) + 1;
        bus.connect(Address::from(pair[0]), Ram::new(size));
    }

    for access in accesses.chunks_exact(10) {
        let width = Width::ALL[usize::from(access[0] & 3)];
        let address = Address::from(access[1]);
        let value = u64::from_le_bytes(access[2..10].try_into().unwrap()) & width.mask();

        if access[0] & 4 == 0 {
            let read = bus.read(address, width);
            assert_eq!(read & !width.mask(), 0);
        } else {
            bus.write(address, width, value);
        }

        if bus.binding_at(address).is_none() {
            assert_eq!(bus.read8(address), 0);
        }

        let fully_inside = bus.bindings().next().is_some_and(|first| {
            first.contains(address) && first.end.wrapping_sub(address) >= Address::from(width.bytes())
        });
        if fully_inside {
            bus.write(address, width, value);
            assert_eq!(bus.read(address, width), value);
        }
    }
});
