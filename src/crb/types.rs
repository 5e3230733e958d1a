use bitfield::bitfield;

use super::constants::*;

/// A 32-bit CRB register image bound to its offset.
pub trait Register: Sized {
    const OFFSET: usize;

    fn from_raw(raw: u32) -> Self;

    fn raw(&self) -> u32;
}

macro_rules! register {
    ($name:ident, $offset:expr) => {
        impl Register for $name {
            const OFFSET: usize = $offset;

            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            fn raw(&self) -> u32 {
                self.0
            }
        }
    };
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegLocState(u32);
    impl Debug;
    pub tpm_established, _: 0;
    pub loc_assigned, _: 1;
    pub u8, active_locality, _: 4, 2;
    // RO, 1 = other bits are valid
    pub reg_valid_sts, _: 7;
}
register!(TpmRegLocState, TPM_REG_LOC_STATE);

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegLocCtrl(u32);
    impl Debug;
    pub request_access, set_request_access: 0;
    pub relinquish, set_relinquish: 1;
    pub seize, set_seize: 2;
    pub reset_establishment, set_reset_establishment: 3;
}
register!(TpmRegLocCtrl, TPM_REG_LOC_CTRL);

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegLocSts(u32);
    impl Debug;
    pub granted, _: 0;
    pub been_seized, _: 1;
}
register!(TpmRegLocSts, TPM_LOCALITY_STS);

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegCtrlRequest(u32);
    impl Debug;
    pub cmd_ready, set_cmd_ready: 0;
    pub go_idle, set_go_idle: 1;
}
register!(TpmRegCtrlRequest, TPM_CRB_CTRL_REQ);

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegCtrlStatus(u32);
    impl Debug;
    pub error, _: 0;
    pub tpm_idle, _: 1;
}
register!(TpmRegCtrlStatus, TPM_CRB_CTRL_STS);

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegCtrlCancel(u32);
    impl Debug;
    pub cancel, set_cancel: 0;
}
register!(TpmRegCtrlCancel, TPM_CRB_CTRL_CANCEL);

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmRegCtrlStart(u32);
    impl Debug;
    pub start, set_start: 0;
}
register!(TpmRegCtrlStart, TPM_CRB_CTRL_START);

impl TpmRegLocCtrl {
    pub fn request() -> Self {
        let mut ctrl = Self(0);
        ctrl.set_request_access(true);
        ctrl
    }

    pub fn release() -> Self {
        let mut ctrl = Self(0);
        ctrl.set_relinquish(true);
        ctrl
    }
}

impl TpmRegCtrlRequest {
    pub fn ready() -> Self {
        let mut req = Self(0);
        req.set_cmd_ready(true);
        req
    }

    pub fn idle() -> Self {
        let mut req = Self(0);
        req.set_go_idle(true);
        req
    }
}
