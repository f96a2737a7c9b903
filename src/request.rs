//! The client-request dispatcher: the six requests a client program can
//! make of this tool through its instrumentation hooks, and the namespace
//! convention (two tag characters plus an ordinal) client requests in this
//! tool's reserved range are recognized by.

use std::convert::TryFrom;

use crate::{
    deps::serde,
    paint::paint,
    tag::{PaintTag, Tag},
    tagstore::TagStore,
    warn_once,
};

/// The two-character tag this tool's client requests are namespaced under,
/// packed the way `VG_USERREQ_TOOL_BASE('O','G')` packs a tool's initials
/// into the top bits of a request code.
const fn tool_base(a: u8, b: u8) -> u64 {
    (((a as u64) << 8) | (b as u64)) << 16
}

const NAMESPACE: u64 = tool_base(b'O', b'G');
const NAMESPACE_MASK: u64 = 0xffff_0000;

const MAKE_NOCHECK: u64 = NAMESPACE + 1;
const MAKE_UNWRITABLE: u64 = NAMESPACE + 2;
const MAKE_UNREFERABLE: u64 = NAMESPACE + 3;
const ADD_REFCHECK_FIELD: u64 = NAMESPACE + 4;
const REMOVE_REFCHECK_FIELD: u64 = NAMESPACE + 5;
const CHECK_UNWRITABLE: u64 = NAMESPACE + 6;

/// One of the six requests a client program can make of this tool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ClientRequest {
    MakeNoCheck { addr: usize, len: usize },
    MakeUnwritable { addr: usize, len: usize },
    MakeUnreferable { addr: usize, len: usize },
    AddRefCheckField { addr: usize },
    RemoveRefCheckField { addr: usize },
    CheckUnwritable { addr: usize },
}

/// Why a raw `[code, arg1..arg4]` client-request payload could not be
/// turned into a [`ClientRequest`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnrecognizedRequest {
    /// The code falls within this tool's own namespace but isn't one of
    /// the six it knows about.
    InNamespace(u64),
    /// The code belongs to some other tool (or none) entirely, and is
    /// silently none of this dispatcher's business.
    OutOfNamespace(u64),
}

impl TryFrom<[u64; 5]> for ClientRequest {
    type Error = UnrecognizedRequest;

    fn try_from(args: [u64; 5]) -> Result<Self, Self::Error> {
        let [code, a1, a2, ..] = args;
        match code {
            MAKE_NOCHECK => Ok(ClientRequest::MakeNoCheck {
                addr: a1 as usize,
                len: a2 as usize,
            }),
            MAKE_UNWRITABLE => Ok(ClientRequest::MakeUnwritable {
                addr: a1 as usize,
                len: a2 as usize,
            }),
            MAKE_UNREFERABLE => Ok(ClientRequest::MakeUnreferable {
                addr: a1 as usize,
                len: a2 as usize,
            }),
            ADD_REFCHECK_FIELD => Ok(ClientRequest::AddRefCheckField { addr: a1 as usize }),
            REMOVE_REFCHECK_FIELD => Ok(ClientRequest::RemoveRefCheckField { addr: a1 as usize }),
            CHECK_UNWRITABLE => Ok(ClientRequest::CheckUnwritable { addr: a1 as usize }),
            code if code & NAMESPACE_MASK == NAMESPACE => Err(UnrecognizedRequest::InNamespace(code)),
            code => Err(UnrecognizedRequest::OutOfNamespace(code)),
        }
    }
}

/// Carry out a recognized client request, returning the value the client
/// program's request macro should see as its result (`CHECK_UNWRITABLE`'s
/// 0/1; every other request's result is unused and always `0`).
pub fn dispatch(store: &mut TagStore, request: ClientRequest) -> u64 {
    match request {
        ClientRequest::MakeNoCheck { addr, len } => {
            paint(store, addr, len, PaintTag::NoCheck);
            0
        }
        ClientRequest::MakeUnwritable { addr, len } => {
            paint(store, addr, len, PaintTag::Unwritable);
            0
        }
        ClientRequest::MakeUnreferable { addr, len } => {
            paint(store, addr, len, PaintTag::Unreferable);
            0
        }
        ClientRequest::AddRefCheckField { addr } => {
            store.set_tag(addr, Tag::RefCheck);
            0
        }
        ClientRequest::RemoveRefCheckField { addr } => {
            store.set_tag(addr, Tag::NoCheck);
            0
        }
        ClientRequest::CheckUnwritable { addr } => (store.get_tag(addr) == Tag::Unwritable) as u64,
    }
}

/// Parse and dispatch a raw client-request payload in one step, the way a
/// handler plumbed straight off `VG_(handle_client_request)` would. Codes
/// outside this tool's namespace are silently ignored (`None`); codes
/// inside the namespace but unrecognized are logged and also `None`,
/// mirroring `og_handle_client_request`'s own fallthrough.
pub fn handle_raw(store: &mut TagStore, args: [u64; 5]) -> Option<u64> {
    match ClientRequest::try_from(args) {
        Ok(request) => Some(dispatch(store, request)),
        Err(UnrecognizedRequest::InNamespace(code)) => {
            warn_once!(UNRECOGNIZED_CLIENT_REQUEST;
                "unrecognized client request {:#x} in this tool's namespace", code);
            None
        }
        Err(UnrecognizedRequest::OutOfNamespace(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_unwritable_then_check_unwritable_round_trips() {
        let mut store = TagStore::new();
        assert_eq!(
            dispatch(
                &mut store,
                ClientRequest::MakeUnwritable { addr: 0x5000, len: 16 }
            ),
            0
        );
        assert_eq!(
            dispatch(&mut store, ClientRequest::CheckUnwritable { addr: 0x5004 }),
            1
        );
        assert_eq!(
            dispatch(&mut store, ClientRequest::CheckUnwritable { addr: 0x6000 }),
            0
        );
    }

    #[test]
    fn add_then_remove_refcheck_field() {
        let mut store = TagStore::new();
        dispatch(&mut store, ClientRequest::AddRefCheckField { addr: 0x7000 });
        assert_eq!(store.get_tag(0x7000), Tag::RefCheck);
        dispatch(&mut store, ClientRequest::RemoveRefCheckField { addr: 0x7000 });
        assert_eq!(store.get_tag(0x7000), Tag::NoCheck);
    }

    #[test]
    fn raw_code_outside_namespace_is_ignored() {
        let mut store = TagStore::new();
        assert_eq!(handle_raw(&mut store, [0xdead_beef, 0, 0, 0, 0]), None);
    }

    #[test]
    fn raw_code_inside_namespace_but_unknown_is_ignored_with_a_warning() {
        let mut store = TagStore::new();
        assert_eq!(handle_raw(&mut store, [NAMESPACE + 99, 0, 0, 0, 0]), None);
    }

    #[test]
    fn raw_make_nocheck_round_trips_through_try_from() {
        let mut store = TagStore::new();
        store.set_tag(0x8000, Tag::Unwritable);
        let result = handle_raw(&mut store, [MAKE_NOCHECK, 0x8000, 8, 0, 0]);
        assert_eq!(result, Some(0));
        assert_eq!(store.get_tag(0x8000), Tag::NoCheck);
    }
}
