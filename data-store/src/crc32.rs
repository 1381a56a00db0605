// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use once_cell::sync::Lazy;

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

/// Lookup table of the reflected CRC-32 polynomial.
///
/// Join kernels receive a copy of this table with the relation catalog and
/// hash join keys with it.
pub static CRC32_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0_u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CRC32_POLYNOMIAL
            } else {
                crc >> 1
            };
        }
        *entry = crc;
    }
    table
});

/// Incremental CRC-32 computation over a lookup table.
#[derive(Clone, Copy, Debug)]
pub struct Crc32<'t> {
    table: &'t [u32; 256],
    crc: u32,
}

impl<'t> Crc32<'t> {
    pub fn new(table: &'t [u32; 256]) -> Self {
        Self {
            table,
            crc: 0xFFFF_FFFF,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        let table = self.table;
        self.crc = data.iter().fold(self.crc, |crc, &b| {
            table[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8)
        });
    }

    pub fn finish(self) -> u32 {
        self.crc ^ 0xFFFF_FFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        let mut crc = Crc32::new(&CRC32_TABLE);
        crc.update(b"123456789");
        assert_eq!(crc.finish(), 0xCBF4_3926);
    }

    #[test]
    fn incremental_equals_oneshot() {
        let mut a = Crc32::new(&CRC32_TABLE);
        a.update(b"hello ");
        a.update(b"world");

        let mut b = Crc32::new(&CRC32_TABLE);
        b.update(b"hello world");

        assert_eq!(a.finish(), b.finish());
    }
}
