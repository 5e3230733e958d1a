/*
 * Command Header Fields:
 *       0   1   2   3   4   5   6   7   8   9   10  ...
 *       -------------------------------------------------------------
 *       | TAG  |     SIZE      | COMMAND CODE  |    other ...
 *       -------------------------------------------------------------
 *
 * Response Header Fields:
 *       0   1   2   3   4   5   6   7   8   9   10  ...
 *       -------------------------------------------------------------
 *       | TAG  |     SIZE      |  RETURN CODE  |    other ...
 *       -------------------------------------------------------------
 */
pub const TPM_HEADER_SIZE: usize = 10;
pub const HEADER_TAG_OFFSET: usize = 0;
pub const HEADER_SIZE_OFFSET: usize = 2;
pub const HEADER_CODE_OFFSET: usize = 6;

/// Size of one handle in the command area.
pub const TPM_HANDLE_SIZE: usize = 4;
/// Handles saved alongside the header by the retry loop.
pub const TPM_SAVED_HANDLES: usize = 3;

pub const TPM_BUFSIZE: usize = 4096;
pub const TPM_DIGEST_SIZE: usize = 20;
pub const TPM_MAX_DIGEST_SIZE: usize = 64;
pub const TPM_MAX_RNG_DATA: usize = 128;
pub const TPM_MAX_ACTIVE_BANKS: usize = 7;
pub const TPM_NR_LOCALITIES: u8 = 5;

/*
 * Timing, all in milliseconds.
 */
pub const TPM_TIMEOUT: u64 = 5;
pub const TPM_TIMEOUT_RETRY: u64 = 100;
pub const TPM_TIMEOUT_POLL: u64 = 1;
pub const TPM_RETRY: u32 = 50;

pub const TIMEOUT_A: u64 = 750;
pub const TIMEOUT_B: u64 = 2000;
pub const TIMEOUT_C: u64 = 750;
pub const TIMEOUT_D: u64 = 750;

pub const TPM2_TIMEOUT_A: u64 = 750;
pub const TPM2_TIMEOUT_B: u64 = 2000;
pub const TPM2_TIMEOUT_C: u64 = 200;
pub const TPM2_TIMEOUT_D: u64 = 30;

pub const TPM2_DURATION_SHORT: u64 = 20;
pub const TPM2_DURATION_MEDIUM: u64 = 750;
pub const TPM2_DURATION_LONG: u64 = 2000;
pub const TPM2_DURATION_LONG_LONG: u64 = 300_000;
pub const TPM2_DURATION_DEFAULT: u64 = 120_000;

pub const TPM1_DURATION_SHORT: u64 = 2000;
pub const TPM1_DURATION_MEDIUM: u64 = 20_000;
pub const TPM1_DURATION_LONG: u64 = 600_000;
pub const TPM1_DURATION_UNDEFINED: u64 = 120_000;

/*
 * TPM 2.0 structure tags and command codes.
 */
pub const TPM2_ST_NO_SESSIONS: u16 = 0x8001;
pub const TPM2_ST_SESSIONS: u16 = 0x8002;

pub const TPM2_CC_FIRST: u32 = 0x011F;
pub const TPM2_CC_HIERARCHY_CONTROL: u32 = 0x0121;
pub const TPM2_CC_HIERARCHY_CHANGE_AUTH: u32 = 0x0129;
pub const TPM2_CC_CREATE_PRIMARY: u32 = 0x0131;
pub const TPM2_CC_SEQUENCE_COMPLETE: u32 = 0x013E;
pub const TPM2_CC_SELF_TEST: u32 = 0x0143;
pub const TPM2_CC_STARTUP: u32 = 0x0144;
pub const TPM2_CC_SHUTDOWN: u32 = 0x0145;
pub const TPM2_CC_NV_READ: u32 = 0x014E;
pub const TPM2_CC_CREATE: u32 = 0x0153;
pub const TPM2_CC_LOAD: u32 = 0x0157;
pub const TPM2_CC_SEQUENCE_UPDATE: u32 = 0x015C;
pub const TPM2_CC_UNSEAL: u32 = 0x015E;
pub const TPM2_CC_CONTEXT_SAVE: u32 = 0x0162;
pub const TPM2_CC_FLUSH_CONTEXT: u32 = 0x0165;
pub const TPM2_CC_VERIFY_SIGNATURE: u32 = 0x0177;
pub const TPM2_CC_GET_CAPABILITY: u32 = 0x017A;
pub const TPM2_CC_GET_RANDOM: u32 = 0x017B;
pub const TPM2_CC_PCR_READ: u32 = 0x017E;
pub const TPM2_CC_PCR_EXTEND: u32 = 0x0182;
pub const TPM2_CC_EVENT_SEQUENCE_COMPLETE: u32 = 0x0185;
pub const TPM2_CC_HASH_SEQUENCE_START: u32 = 0x0186;
pub const TPM2_CC_CREATE_LOADED: u32 = 0x0191;
pub const TPM2_CC_LAST: u32 = 0x0193;

/*
 * TPM 2.0 response codes.
 */
pub const TPM2_RC_SUCCESS: u32 = 0x0000;
pub const TPM2_RC_HASH: u32 = 0x0083;
pub const TPM2_RC_INITIALIZE: u32 = 0x0100;
pub const TPM2_RC_FAILURE: u32 = 0x0101;
pub const TPM2_RC_DISABLED: u32 = 0x0120;
pub const TPM2_RC_COMMAND_CODE: u32 = 0x0143;
pub const TPM2_RC_TESTING: u32 = 0x090A;
pub const TPM2_RC_RETRY: u32 = 0x0922;

pub const TSS2_RC_LAYER_SHIFT: u32 = 16;
pub const TSS2_RESMGR_TPM_RC_LAYER: u32 = 11 << TSS2_RC_LAYER_SHIFT;

pub const TPM2_SU_CLEAR: u16 = 0x0000;
pub const TPM2_SU_STATE: u16 = 0x0001;

pub const TPM2_RS_PW: u32 = 0x4000_0009;
pub const TPM2_SA_CONTINUE_SESSION: u8 = 1 << 0;

pub const TPM2_CAP_COMMANDS: u32 = 0x0000_0002;
pub const TPM2_CAP_PCRS: u32 = 0x0000_0005;
pub const TPM2_CAP_TPM_PROPERTIES: u32 = 0x0000_0006;

pub const TPM2_PT_FIXED: u32 = 0x0100;
pub const TPM2_PT_TOTAL_COMMANDS: u32 = TPM2_PT_FIXED + 41;

pub const TPM2_OA_FIXED_TPM: u32 = 1 << 1;
pub const TPM2_OA_FIXED_PARENT: u32 = 1 << 4;
pub const TPM2_OA_USER_WITH_AUTH: u32 = 1 << 6;

pub const TPM2_PCR_SELECT_MIN: usize = 3;
pub const TPM2_PLATFORM_PCR: u32 = 24;

/// Sealed key material bounds.
pub const MIN_KEY_SIZE: usize = 32;
pub const MAX_KEY_SIZE: usize = 128;
pub const MAX_BLOB_SIZE: usize = 512;

/*
 * TPM 1.2 tags, ordinals and return codes.
 */
pub const TPM_TAG_RQU_COMMAND: u16 = 0x00C1;
pub const TPM_TAG_RSP_COMMAND: u16 = 0x00C4;

pub const TPM_ORD_PCR_EXTEND: u32 = 0x0014;
pub const TPM_ORD_PCR_READ: u32 = 0x0015;
pub const TPM_ORD_GET_RANDOM: u32 = 0x0046;
pub const TPM_ORD_SELFTEST_FULL: u32 = 0x0050;
pub const TPM_ORD_CONTINUE_SELFTEST: u32 = 0x0053;
pub const TPM_ORD_GET_CAP: u32 = 0x0065;
pub const TPM_ORD_SAVESTATE: u32 = 0x0098;
pub const TPM_ORD_STARTUP: u32 = 0x0099;

pub const TPM_ST_CLEAR: u16 = 0x0001;

pub const TPM_CAP_PROP: u32 = 0x0005;
pub const TPM_CAP_PROP_TIS_TIMEOUT: u32 = 0x0115;
pub const TPM_CAP_PROP_TIS_DURATION: u32 = 0x0120;

pub const TPM_ERR_DEACTIVATED: u32 = 0x6;
pub const TPM_ERR_DISABLED: u32 = 0x7;
pub const TPM_ERR_INVALID_POSTINIT: u32 = 38;
pub const TPM_WARN_RETRY: u32 = 0x800;
pub const TPM_WARN_DOING_SELFTEST: u32 = 0x802;

/*
 * The TCG maintains a registry of all algorithms that have an
 * assigned algorithm ID. Only the hash algorithms matter here.
 */
pub const TPM_ALG_ERROR: u16 = 0x0000;
pub const TPM_ALG_SHA1: u16 = 0x0004;
pub const TPM_ALG_KEYEDHASH: u16 = 0x0008;
pub const TPM_ALG_SHA256: u16 = 0x000B;
pub const TPM_ALG_SHA384: u16 = 0x000C;
pub const TPM_ALG_SHA512: u16 = 0x000D;
pub const TPM_ALG_NULL: u16 = 0x0010;
pub const TPM_ALG_SM3_256: u16 = 0x0012;

/// Digest size of a TCG hash algorithm, `None` for anything else.
pub const fn digest_size(alg: u16) -> Option<usize> {
    match alg {
        TPM_ALG_SHA1 => Some(20),
        TPM_ALG_SHA256 | TPM_ALG_SM3_256 => Some(32),
        TPM_ALG_SHA384 => Some(48),
        TPM_ALG_SHA512 => Some(64),
        _ => None,
    }
}
