use std::collections::HashMap;

use crate::core::DeviceUid;
use crate::error::BlobError;

use super::{Device, Endpoint};

/// "DFB1" read as a little-endian u32.
pub const MAGIC: u32 = 0x3142_4644;
pub const VERSION: u16 = 1;

const UID_LEN: usize = 19;
const NAME_LEN: usize = 32;
const MAX_CLUSTERS: usize = 8;

pub const HEADER_SIZE: usize = 12;
pub const DEVICE_SIZE: usize = UID_LEN + 2 + 8 + 1 + 1 + NAME_LEN;
pub const ENDPOINT_SIZE: usize = UID_LEN + 2 + 1 + 2 + 2 + 1 + 1 + MAX_CLUSTERS * 2 + MAX_CLUSTERS * 2;

/// Decodes the binary device directory. Devices keep the order in which their uid was first
/// seen, whether that was a device record or an endpoint record.
pub fn parse_device_blob(bytes: &[u8]) -> Result<Vec<Device>, BlobError> {
    if bytes.len() < HEADER_SIZE {
        return Err(BlobError::TooShort { len: bytes.len() });
    }

    let mut header = Reader::new(bytes);
    let magic = header.u32();
    let version = header.u16();
    let device_count = header.u16() as usize;
    let endpoint_count = header.u16() as usize;

    if magic != MAGIC {
        return Err(BlobError::BadMagic { found: magic });
    }
    if version != VERSION {
        return Err(BlobError::UnsupportedVersion(version));
    }

    let expected = HEADER_SIZE + device_count * DEVICE_SIZE + endpoint_count * ENDPOINT_SIZE;
    if bytes.len() < expected {
        return Err(BlobError::ShortPayload {
            actual: bytes.len(),
            expected,
        });
    }

    let mut directory = DirectoryBuilder::default();

    for i in 0..device_count {
        let offset = HEADER_SIZE + i * DEVICE_SIZE;
        let mut r = Reader::new(&bytes[offset..offset + DEVICE_SIZE]);

        let uid = r.c_string(UID_LEN);
        let short_addr = r.u16();
        let last_seen_ms = r.u64();
        let has_onoff = r.u8() != 0;
        let has_button = r.u8() != 0;
        let name = r.c_string(NAME_LEN);

        if uid.is_empty() {
            continue;
        }

        directory.put_device(Device {
            device_uid: DeviceUid::normalized(&uid),
            short_addr,
            last_seen_ms,
            name,
            has_onoff,
            has_button,
            endpoints: vec![],
        });
    }

    let endpoints_start = HEADER_SIZE + device_count * DEVICE_SIZE;
    for i in 0..endpoint_count {
        let offset = endpoints_start + i * ENDPOINT_SIZE;
        let mut r = Reader::new(&bytes[offset..offset + ENDPOINT_SIZE]);

        let uid = r.c_string(UID_LEN);
        let short_addr = r.u16();
        let endpoint = r.u8();
        let profile_id = r.u16();
        let device_id = r.u16();
        let in_count = (r.u8() as usize).min(MAX_CLUSTERS);
        let out_count = (r.u8() as usize).min(MAX_CLUSTERS);
        let in_slots = r.u16_slots();
        let out_slots = r.u16_slots();

        if uid.is_empty() {
            continue;
        }

        let uid = DeviceUid::normalized(&uid);
        let endpoint = Endpoint::new(
            endpoint,
            profile_id,
            device_id,
            in_slots[..in_count].to_vec(),
            out_slots[..out_count].to_vec(),
        );
        directory.device_or_placeholder(uid, short_addr).endpoints.push(endpoint);
    }

    Ok(directory.into_devices())
}

#[derive(Default)]
struct DirectoryBuilder {
    devices: Vec<Device>,
    index: HashMap<DeviceUid, usize>,
}

impl DirectoryBuilder {
    // A repeated device record replaces the earlier one in place.
    fn put_device(&mut self, device: Device) {
        match self.index.get(&device.device_uid) {
            Some(&i) => self.devices[i] = device,
            None => {
                self.index.insert(device.device_uid.clone(), self.devices.len());
                self.devices.push(device);
            }
        }
    }

    fn device_or_placeholder(&mut self, uid: DeviceUid, short_addr: u16) -> &mut Device {
        let i = match self.index.get(&uid) {
            Some(&i) => i,
            None => {
                let i = self.devices.len();
                self.index.insert(uid.clone(), i);
                self.devices.push(Device::placeholder(uid, short_addr));
                i
            }
        };
        &mut self.devices[i]
    }

    fn into_devices(self) -> Vec<Device> {
        self.devices
    }
}

/// Little-endian cursor over a record whose length was validated up front.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn u16_slots(&mut self) -> [u16; MAX_CLUSTERS] {
        let mut slots = [0u16; MAX_CLUSTERS];
        for slot in slots.iter_mut() {
            *slot = self.u16();
        }
        slots
    }

    /// Bytes up to the first NUL or the field length, lossily decoded and trimmed.
    fn c_string(&mut self, len: usize) -> String {
        let field = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        let end = field.iter().position(|b| *b == 0).unwrap_or(len);
        String::from_utf8_lossy(&field[..end]).trim().to_owned()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Builds directory blobs byte by byte for tests elsewhere in the crate.
    #[derive(Default)]
    pub struct BlobBuilder {
        devices: Vec<Vec<u8>>,
        endpoints: Vec<Vec<u8>>,
    }

    impl BlobBuilder {
        pub fn device(mut self, uid: &str, short_addr: u16, last_seen_ms: u64, name: &str) -> Self {
            let mut rec = fixed(uid, UID_LEN);
            rec.extend_from_slice(&short_addr.to_le_bytes());
            rec.extend_from_slice(&last_seen_ms.to_le_bytes());
            rec.push(1);
            rec.push(0);
            rec.extend(fixed(name, NAME_LEN));
            self.devices.push(rec);
            self
        }

        pub fn endpoint(mut self, uid: &str, short_addr: u16, endpoint: u8, in_clusters: &[u16], out_clusters: &[u16]) -> Self {
            self.endpoints.push(endpoint_record(
                uid,
                short_addr,
                endpoint,
                in_clusters.len() as u8,
                in_clusters,
                out_clusters.len() as u8,
                out_clusters,
            ));
            self
        }

        pub fn raw_endpoint(mut self, record: Vec<u8>) -> Self {
            self.endpoints.push(record);
            self
        }

        pub fn build(self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&MAGIC.to_le_bytes());
            out.extend_from_slice(&VERSION.to_le_bytes());
            out.extend_from_slice(&(self.devices.len() as u16).to_le_bytes());
            out.extend_from_slice(&(self.endpoints.len() as u16).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
            for rec in self.devices.into_iter().chain(self.endpoints) {
                out.extend(rec);
            }
            out
        }
    }

    pub fn endpoint_record(
        uid: &str,
        short_addr: u16,
        endpoint: u8,
        in_count: u8,
        in_clusters: &[u16],
        out_count: u8,
        out_clusters: &[u16],
    ) -> Vec<u8> {
        let mut rec = fixed(uid, UID_LEN);
        rec.extend_from_slice(&short_addr.to_le_bytes());
        rec.push(endpoint);
        rec.extend_from_slice(&0x0104u16.to_le_bytes());
        rec.extend_from_slice(&0x0101u16.to_le_bytes());
        rec.push(in_count);
        rec.push(out_count);
        for list in [in_clusters, out_clusters] {
            for i in 0..MAX_CLUSTERS {
                rec.extend_from_slice(&list.get(i).copied().unwrap_or(0).to_le_bytes());
            }
        }
        rec
    }

    fn fixed(s: &str, len: usize) -> Vec<u8> {
        let mut field = s.as_bytes().to_vec();
        field.resize(len, 0);
        field
    }
}
