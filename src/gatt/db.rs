use bytes::Bytes;
use tracing::info;

use crate::att::{Handle, HandleRange, Perms};
use crate::gap::{Uuid, Uuid16};

use super::*;

/// Attribute database.
///
/// Stores services, characteristics, and descriptors sorted by handle. Handles
/// are assigned when a service is added and are never handed out again, even
/// after the service is removed.
#[derive(Clone, Debug)]
pub struct Db {
    /// Attribute entries sorted by handle.
    attr: Vec<Attr>,
    /// First unassigned handle or [`None`] if the handle space is used up.
    next: Option<Handle>,
}

impl Default for Db {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    /// Creates an empty database.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attr: Vec::new(),
            next: Some(Handle::MIN),
        }
    }

    /// Returns the number of attributes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.attr.len()
    }

    /// Returns whether the database has no attributes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attr.is_empty()
    }

    /// Adds a service, assigning contiguous handles to the service declaration
    /// and all of its attributes. Returns the service handle or [`None`] if the
    /// service does not fit in the remaining handle space.
    pub fn add_service(&mut self, s: &Service) -> Option<Handle> {
        let start = self.next?;
        let n = u16::try_from(s.handle_count()).ok()?;
        let last = start.add(n - 1)?;
        let decl = if s.primary {
            Declaration::PRIMARY_SERVICE
        } else {
            Declaration::SECONDARY_SERVICE
        };
        let mut v = Vec::with_capacity(usize::from(n));
        v.push((decl.as_uuid(), Perms::READ, Bytes::from(s.uuid.to_vec())));
        for c in &s.characteristics {
            // [Vol 3] Part G, Section 3.3.1
            let vhdl = start.add(u16::try_from(v.len() + 1).ok()?)?;
            let mut dv = Vec::with_capacity(3 + 16);
            dv.push(c.props.bits());
            dv.extend_from_slice(&u16::from(vhdl).to_le_bytes());
            dv.extend_from_slice(&c.uuid.to_vec());
            v.push((Declaration::CHARACTERISTIC.as_uuid(), Perms::READ, Bytes::from(dv)));
            v.push((c.uuid, c.perms, c.value.clone()));
            for d in &c.descriptors {
                v.push((d.uuid, d.perms, d.value.clone()));
            }
            if c.needs_cccd() {
                let d = CharDescriptor::cccd();
                v.push((d.uuid, d.perms, d.value));
            }
        }
        self.attr.reserve(v.len());
        for (i, (typ, perms, val)) in v.into_iter().enumerate() {
            let hdl = start.add(u16::try_from(i).ok()?)?;
            self.attr.push(Attr { hdl, typ, perms, val });
        }
        self.next = last.next();
        Some(start)
    }

    /// Removes the service declared at `hdl` along with all of its attributes.
    /// Does nothing if `hdl` is not a service declaration.
    pub fn remove_service(&mut self, hdl: Handle) {
        if let Some(r) = self.service_index(hdl) {
            self.attr.drain(r);
        }
    }

    /// Removes all services. Handles of removed services are not reused.
    #[inline]
    pub fn remove_all(&mut self) {
        self.attr.clear();
    }

    /// Replaces the value of the attribute at `hdl`. Does nothing if the handle
    /// is invalid.
    pub fn write(&mut self, v: impl Into<Bytes>, hdl: Handle) {
        if let Ok(i) = self.find(hdl) {
            self.attr[i].val = v.into();
        }
    }

    /// Returns the value of the attribute at `hdl`.
    #[inline]
    #[must_use]
    pub fn value(&self, hdl: Handle) -> Option<Bytes> {
        self.get(hdl).map(|at| at.val.clone())
    }

    /// Returns the handles of all attributes of type `uuid` in handle order.
    #[must_use]
    pub fn characteristics(&self, uuid: Uuid) -> Vec<Handle> {
        (self.attr.iter())
            .filter_map(|at| (at.typ == uuid).then_some(at.hdl))
            .collect()
    }

    /// Returns an iterator over all attributes in handle order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Handle, Uuid, &[u8])> {
        (self.attr.iter()).map(|at| (at.hdl, at.typ, at.val.as_ref()))
    }

    /// Returns the handle range of the service declared at `hdl` or [`None`]
    /// if `hdl` is not a service declaration.
    #[must_use]
    pub fn service_range(&self, hdl: Handle) -> Option<HandleRange> {
        let r = self.service_index(hdl)?;
        Some(HandleRange::new(self.attr[r.start].hdl, self.attr[r.end - 1].hdl))
    }

    /// Returns the attribute at `hdl`.
    #[inline]
    #[must_use]
    pub fn get(&self, hdl: Handle) -> Option<&Attr> {
        self.find(hdl).ok().map(|i| &self.attr[i])
    }

    /// Returns all attributes within the specified handle range.
    pub(crate) fn subset(&self, hdls: HandleRange) -> &[Attr] {
        let i = self.find(hdls.start()).unwrap_or_else(|i| i);
        let j = self.find(hdls.end()).map_or_else(|j| j, |j| j + 1);
        self.attr.get(i..j).unwrap_or_default()
    }

    /// Returns an iterator over service declarations of type `typ` within
    /// `hdls`, along with their group handle ranges.
    pub(crate) fn services(
        &self,
        hdls: HandleRange,
        typ: Uuid16,
    ) -> impl Iterator<Item = (HandleRange, &Attr)> {
        (self.subset(hdls).iter())
            .filter(move |at| at.typ == typ)
            .filter_map(|at| Some((self.service_range(at.hdl)?, at)))
    }

    /// Returns characteristic information for any handle within the
    /// characteristic definition. Returns [`None`] if the handle is not part of
    /// any characteristic.
    pub(crate) fn characteristic(&self, hdl: Handle) -> Option<CharInfo> {
        let i = self.find(hdl).ok()?;
        let decl = self.attr[..=i].iter().rposition(Attr::is_char)?;
        if self.attr[decl + 1..=i].iter().any(Attr::is_service) {
            return None;
        }
        let end = (self.attr[decl + 1..].iter())
            .position(|at| at.is_char() || at.is_service() || at.is_include())
            .map_or(self.attr.len(), |j| decl + 1 + j);
        if end <= i {
            return None;
        }
        let dv = self.attr[decl].val.as_ref();
        let (props, vhdl) = match *dv {
            [p, a, b, ..] => (Prop::from_bits_retain(p), Handle::new(u16::from_le_bytes([a, b]))?),
            _ => return None,
        };
        let cccd = (self.attr[decl + 1..end].iter())
            .find(|at| at.typ == Descriptor::CLIENT_CHARACTERISTIC_CONFIGURATION)
            .map(|at| at.hdl);
        Some(CharInfo { props, vhdl, cccd })
    }

    /// Logs database contents.
    pub fn dump(&self) {
        info!("GATT database:");
        let mut vhdl = None;
        for at in &self.attr {
            let h = u16::from(at.hdl);
            if at.is_service() {
                let sec = if at.typ == Declaration::PRIMARY_SERVICE { "" } else { "(Secondary) " };
                let uuid = Uuid::try_from(at.val.as_ref()).ok();
                info!("[{h:#06X}] {sec}Service <{}>", OptUuid(uuid));
            } else if at.is_char() {
                let (_, val) = at.val.split_at(at.val.len().min(3));
                vhdl = self.characteristic(at.hdl).map(|c| c.vhdl);
                info!("[{h:#06X}] |__ Characteristic <{}>", OptUuid(Uuid::try_from(val).ok()));
            } else if Some(at.hdl) == vhdl {
                info!("[{h:#06X}]     |__ [Value <{}>] {:02X?}", at.typ, at.val.as_ref());
            } else {
                info!("[{h:#06X}]     |__ Descriptor <{}>", at.typ);
            }
        }
    }

    /// Returns the index of the attribute at `hdl` or the index where that
    /// handle can be inserted.
    #[inline]
    fn find(&self, hdl: Handle) -> std::result::Result<usize, usize> {
        self.attr.binary_search_by(|at| at.hdl.cmp(&hdl))
    }

    /// Returns the index range of the service group declared at `hdl`.
    fn service_index(&self, hdl: Handle) -> Option<std::ops::Range<usize>> {
        let i = self.find(hdl).ok()?;
        if !self.attr[i].is_service() {
            return None;
        }
        let j = (self.attr[i + 1..].iter())
            .position(Attr::is_service)
            .map_or(self.attr.len(), |j| i + 1 + j);
        Some(i..j)
    }
}

/// Information about a single characteristic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct CharInfo {
    pub props: Prop,
    pub vhdl: Handle,
    pub cccd: Option<Handle>,
}

/// Attribute entry.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Attr {
    pub hdl: Handle,
    pub typ: Uuid,
    pub perms: Perms,
    pub val: Bytes,
}

impl Attr {
    /// Returns whether the attribute is a service declaration.
    #[inline]
    fn is_service(&self) -> bool {
        self.typ == Declaration::PRIMARY_SERVICE || self.typ == Declaration::SECONDARY_SERVICE
    }

    /// Returns whether the attribute is an include declaration.
    #[inline]
    fn is_include(&self) -> bool {
        self.typ == Declaration::INCLUDE
    }

    /// Returns whether the attribute is a characteristic declaration.
    #[inline]
    fn is_char(&self) -> bool {
        self.typ == Declaration::CHARACTERISTIC
    }

    /// Returns whether the attribute is any GATT declaration.
    #[inline]
    pub(super) fn is_decl(&self) -> bool {
        self.is_service() || self.is_include() || self.is_char()
    }
}

/// Formats an optional UUID.
struct OptUuid(Option<Uuid>);

impl std::fmt::Display for OptUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(u) => std::fmt::Display::fmt(&u, f),
            None => f.write_str("?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::gap::uuid16;

    use super::*;

    fn svc(uuid: u16, chars: usize) -> Service {
        let mut s = Service::primary(uuid16(uuid));
        for i in 0..chars {
            #[allow(clippy::cast_possible_truncation)]
            let c = Characteristic::new(
                uuid16(0x2A00 + i as u16),
                Prop::READ | Prop::WRITE | Prop::NOTIFY,
                Perms::READ_WRITE,
                vec![0x00],
            );
            s = s.with(c);
        }
        s
    }

    fn handles(db: &Db) -> Vec<u16> {
        db.iter().map(|(h, _, _)| u16::from(h)).collect()
    }

    #[test]
    fn add_service() {
        let mut db = Db::new();
        let h = db.add_service(&svc(0x180D, 1)).unwrap();
        assert_eq!(h, Handle::MIN);
        // Service, declaration, value, CCCD
        assert_eq!(handles(&db), [1, 2, 3, 4]);
        let vhdl = db.characteristics(uuid16(0x2A00).as_uuid());
        assert_eq!(vhdl, [Handle::new(3).unwrap()]);
        assert_eq!(db.value(vhdl[0]).unwrap().as_ref(), [0x00]);
        assert_eq!(
            db.value(Handle::new(2).unwrap()).unwrap().as_ref(),
            [0x1A, 0x03, 0x00, 0x00, 0x2A]
        );
        assert_eq!(db.value(Handle::new(4).unwrap()).unwrap().as_ref(), [0, 0]);
        assert_eq!(
            db.service_range(h),
            Some(HandleRange::new(h, Handle::new(4).unwrap()))
        );
        db.dump();
    }

    #[test]
    fn handles_are_monotonic() {
        let mut db = Db::new();
        let a = db.add_service(&svc(0x1800, 2)).unwrap();
        let b = db.add_service(&svc(0x1801, 1)).unwrap();
        let c = db.add_service(&svc(0x1802, 0)).unwrap();
        assert!(a < b && b < c);
        db.remove_service(b);
        assert_eq!(db.service_range(b), None);
        let d = db.add_service(&svc(0x1803, 1)).unwrap();
        assert!(d > c);
        let hs = handles(&db);
        assert!(hs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn remove_service() {
        let mut db = Db::new();
        let a = db.add_service(&svc(0x1800, 1)).unwrap();
        let b = db.add_service(&svc(0x1801, 2)).unwrap();
        let r = db.service_range(a).unwrap();
        db.remove_service(a);
        for h in u16::from(r.start())..=u16::from(r.end()) {
            assert!(db.value(Handle::new(h).unwrap()).is_none());
        }
        assert_eq!(db.iter().next().map(|(h, _, _)| h), Some(b));

        // Not a service declaration
        let n = db.len();
        db.remove_service(b.next().unwrap());
        assert_eq!(db.len(), n);

        db.remove_all();
        assert!(db.is_empty());
        assert!(db.add_service(&svc(0x1800, 0)).unwrap() > b);
    }

    #[test]
    fn removed_handles_are_not_reused() {
        let mut db = Db::new();
        let a = db.add_service(&svc(0x180F, 1)).unwrap();
        let end = db.service_range(a).unwrap().end();
        db.remove_service(a);
        assert!(db.is_empty());
        let b = db.add_service(&svc(0x180F, 1)).unwrap();
        assert!(b > end);
        assert!(db.characteristics(uuid16(0x2A00).as_uuid())[0] > end);

        // A copy taken before the removal keeps its own handles
        let mut old = Db::new();
        old.add_service(&svc(0x180F, 1)).unwrap();
        let snap = old.clone();
        old.remove_all();
        let c = old.add_service(&svc(0x180F, 1)).unwrap();
        assert!(snap.get(c).is_none());
    }

    #[test]
    fn write() {
        let mut db = Db::new();
        db.add_service(&svc(0x1800, 1)).unwrap();
        let h = Handle::new(3).unwrap();
        db.write(vec![0x01, 0x02], h);
        assert_eq!(db.value(h).unwrap().as_ref(), [0x01, 0x02]);
        // Invalid handle is ignored
        db.write(vec![0xFF], Handle::new(100).unwrap());
        assert_eq!(db.len(), 4);
    }

    #[test]
    fn characteristics_by_uuid() {
        let mut db = Db::new();
        db.add_service(&svc(0x1800, 2)).unwrap();
        db.add_service(&svc(0x1801, 1)).unwrap();
        let hs = db.characteristics(uuid16(0x2A00).as_uuid());
        assert_eq!(hs, [Handle::new(3).unwrap(), Handle::new(10).unwrap()]);
        assert!(db.characteristics(uuid16(0x2AFF).as_uuid()).is_empty());
    }

    #[test]
    fn characteristic_info() {
        let mut db = Db::new();
        db.add_service(&svc(0x1800, 2)).unwrap();
        let info = db.characteristic(Handle::new(4).unwrap()).unwrap();
        assert_eq!(info.vhdl, Handle::new(3).unwrap());
        assert_eq!(info.cccd, Handle::new(4));
        assert!(info.props.contains(Prop::NOTIFY));
        assert_eq!(
            db.characteristic(Handle::new(6).unwrap()).map(|c| c.vhdl),
            Handle::new(6)
        );
        assert_eq!(db.characteristic(Handle::MIN), None);
    }

    #[test]
    fn handle_space_exhausted() {
        let mut db = Db::new();
        let mut s = Service::primary(uuid16(0x1800));
        for _ in 0..0x7FFF {
            s = s.with(Characteristic::new(
                uuid16(0x2A00),
                Prop::READ,
                Perms::READ,
                Bytes::new(),
            ));
        }
        // 1 + 2 * 0x7FFF = 0xFFFF handles
        assert_eq!(db.add_service(&s), Some(Handle::MIN));
        assert_eq!(db.add_service(&svc(0x1801, 0)), None);
        // Removal does not free handles for reuse
        db.remove_all();
        assert_eq!(db.add_service(&svc(0x1801, 0)), None);
    }
}
