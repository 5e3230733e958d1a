//-----------------------------------------------------------------------------
// CRB interface registers, see TCG PC Client Platform TPM Profile (PTP)
// Specification. Offsets are relative to a locality's register block.
//-----------------------------------------------------------------------------
pub const TPM_LOCALITY_BASE: u64 = 0xFED4_0000;
pub const TPM_NR_LOCALITIES: u8 = 5;
/// Distance between two localities' register blocks.
pub const TPM_LOCALITY_STRIDE: usize = 0x1000;

pub const TPM_REG_LOC_STATE: usize = 0x00;
pub const TPM_REG_LOC_CTRL: usize = 0x08;
pub const TPM_LOCALITY_STS: usize = 0x0C;
pub const TPM_INTERFACE_ID: usize = 0x30;
pub const TPM_CRB_CTRL_REQ: usize = 0x40;
pub const TPM_CRB_CTRL_STS: usize = 0x44;
pub const TPM_CRB_CTRL_CANCEL: usize = 0x48;
pub const TPM_CRB_CTRL_START: usize = 0x4C;
pub const TPM_CRB_CTRL_CMD_SIZE: usize = 0x58;
pub const TPM_CRB_CTRL_CMD_LADDR: usize = 0x5C;
pub const TPM_CRB_CTRL_CMD_HADDR: usize = 0x60;
pub const TPM_CRB_CTRL_RSP_SIZE: usize = 0x64;
pub const TPM_CRB_CTRL_RSP_ADDR: usize = 0x68;
pub const TPM_CRB_DATA_BUFFER: usize = 0x80;
pub const TPMCRBBUF_LEN: usize = 0xF80; // 3968 bytes

/// Bits of the status byte `CrbTransport::status` synthesizes.
pub const CRB_STS_COMPLETE: u8 = 1 << 0;
pub const CRB_STS_CANCELED: u8 = 1 << 1;

/// Bytes of the response header read before the declared length is known.
pub const CRB_RSP_HEADER_LEN: usize = 10;
