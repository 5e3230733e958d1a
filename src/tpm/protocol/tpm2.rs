use alloc::vec::Vec;

use log::debug;

use super::TpmProtocol;
use crate::tpm::buf::{ResponseReader, TpmBuf};
use crate::tpm::chip::BankTable;
use crate::tpm::constants::*;
use crate::tpm::error::{TpmError, TpmResult};
use crate::tpm::ops::CommandChannel;
use crate::tpm::types::{
    CcAttrTable, Timing, TpmDigest, TpmDuration, TpmTimeout, TpmVersion, TransmitFlags, TrustedKeyOptions,
    TrustedKeyPayload,
};

const CC_ATTR_CHANDLES: u32 = 25;

/// TPM 2.0 command set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tpm2;

fn ordinal_duration(ordinal: u32) -> u64 {
    match ordinal {
        TPM2_CC_STARTUP => 750,
        TPM2_CC_SELF_TEST => 3000,
        TPM2_CC_GET_RANDOM => 2000,
        TPM2_CC_SEQUENCE_UPDATE
        | TPM2_CC_SEQUENCE_COMPLETE
        | TPM2_CC_EVENT_SEQUENCE_COMPLETE
        | TPM2_CC_HASH_SEQUENCE_START => 750,
        TPM2_CC_VERIFY_SIGNATURE => 30000,
        TPM2_CC_PCR_EXTEND => 750,
        TPM2_CC_HIERARCHY_CONTROL | TPM2_CC_HIERARCHY_CHANGE_AUTH => 2000,
        TPM2_CC_GET_CAPABILITY => 750,
        TPM2_CC_NV_READ => 2000,
        TPM2_CC_CREATE_PRIMARY | TPM2_CC_CREATE | TPM2_CC_CREATE_LOADED => TPM2_DURATION_LONG_LONG,
        _ => TPM2_DURATION_DEFAULT,
    }
}

/// Error number of a format-one response code, without the
/// handle/parameter/session position.
fn rc_value(rc: u32) -> u32 {
    if rc & (1 << 7) != 0 { rc & 0xBF } else { rc }
}

/// Password authorization area: empty nonce, `hmac` as the password.
fn append_auth(buf: &mut TpmBuf, session: u32, attributes: u8, hmac: &[u8]) {
    buf.append_u32(9 + hmac.len() as u32);
    buf.append_u32(session);
    buf.append_u16(0);
    buf.append_u8(attributes);
    buf.append_sized(hmac);
}

fn self_test(chip: &dyn CommandChannel) -> TpmResult<()> {
    let mut rc = Ok(());
    for full in [0u8, 1] {
        let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_SELF_TEST);
        buf.append_u8(full);
        rc = match chip.transmit_buf(&mut buf, 0, TransmitFlags::empty(), "attempting the self test") {
            Ok(_) | Err(TpmError::Tpm(TPM2_RC_TESTING)) => return Ok(()),
            Err(e @ TpmError::Tpm(TPM2_RC_INITIALIZE)) => return Err(e),
            Err(e) => Err(e),
        };
    }
    rc
}

fn startup_clear(chip: &dyn CommandChannel) -> TpmResult<()> {
    let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_STARTUP);
    buf.append_u16(TPM2_SU_CLEAR);
    chip.transmit_buf(&mut buf, 0, TransmitFlags::empty(), "attempting to start the TPM")?;
    Ok(())
}

fn get_tpm_pt(chip: &dyn CommandChannel, property: u32, desc: &str) -> TpmResult<u32> {
    let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_GET_CAPABILITY);
    buf.append_u32(TPM2_CAP_TPM_PROPERTIES);
    buf.append_u32(property);
    buf.append_u32(1);
    chip.transmit_buf(&mut buf, 17, TransmitFlags::empty(), desc)?;

    // more_data, capability, count, property
    let mut body = buf.body();
    body.skip(13)?;
    body.u32()
}

fn load(chip: &dyn CommandChannel, payload: &TrustedKeyPayload, options: &TrustedKeyOptions) -> TpmResult<u32> {
    // TPM2B_PRIVATE then TPM2B_PUBLIC; anything after them is ignored.
    let mut blob = ResponseReader::new(&payload.blob, 0);
    blob.sized().and_then(|_| blob.sized()).map_err(|_| TpmError::InvalidArgument)?;
    let blob_len = blob.position();

    let mut buf = TpmBuf::new(TPM2_ST_SESSIONS, TPM2_CC_LOAD);
    buf.append_u32(options.key_handle);
    append_auth(&mut buf, TPM2_RS_PW, 0, &options.key_auth);
    buf.append(&payload.blob[..blob_len]);
    chip.transmit_buf(&mut buf, 4, TransmitFlags::UNLOCKED, "loading blob")?;
    buf.body().u32()
}

fn unseal(
    chip: &dyn CommandChannel,
    payload: &mut TrustedKeyPayload,
    options: &TrustedKeyOptions,
    handle: u32,
) -> TpmResult<()> {
    let session = if options.policy_handle != 0 { options.policy_handle } else { TPM2_RS_PW };

    let mut buf = TpmBuf::new(TPM2_ST_SESSIONS, TPM2_CC_UNSEAL);
    buf.append_u32(handle);
    append_auth(&mut buf, session, TPM2_SA_CONTINUE_SESSION, &options.blob_auth);
    chip.transmit_buf(&mut buf, 6, TransmitFlags::UNLOCKED, "unsealing")?;

    let mut body = buf.body();
    body.skip(4)?;
    let data = body.sized()?;
    if data.len() < MIN_KEY_SIZE || data.len() > MAX_KEY_SIZE + 1 {
        return Err(TpmError::ShortResponse { len: data.len(), expected: MIN_KEY_SIZE });
    }
    let (key, migratable) = data.split_at(data.len() - 1);
    payload.key = key.to_vec();
    payload.migratable = migratable[0] != 0;
    Ok(())
}

fn flush_context(chip: &dyn CommandChannel, handle: u32) {
    let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_FLUSH_CONTEXT);
    buf.append_u32(handle);
    if let Err(e) = chip.transmit_buf(&mut buf, 0, TransmitFlags::UNLOCKED, "flushing context") {
        debug!("flush of {handle:#010x} failed: {e}");
    }
}

impl TpmProtocol for Tpm2 {
    fn version(&self) -> TpmVersion {
        TpmVersion::Tpm2
    }

    fn ordinal_duration(&self, _timing: &Timing, ordinal: u32) -> u64 {
        ordinal_duration(ordinal)
    }

    fn get_timeouts(&self, _chip: &dyn CommandChannel) -> TpmResult<Timing> {
        Ok(Timing {
            timeout: TpmTimeout {
                timeout_a: TPM2_TIMEOUT_A,
                timeout_b: TPM2_TIMEOUT_B,
                timeout_c: TPM2_TIMEOUT_C,
                timeout_d: TPM2_TIMEOUT_D,
            },
            duration: TpmDuration {
                short: TPM2_DURATION_SHORT,
                medium: TPM2_DURATION_MEDIUM,
                long: TPM2_DURATION_LONG,
                long_long: TPM2_DURATION_LONG_LONG,
            },
        })
    }

    fn startup(&self, chip: &dyn CommandChannel, _timing: &Timing) -> TpmResult<()> {
        match self_test(chip) {
            Err(TpmError::Tpm(TPM2_RC_INITIALIZE)) => {
                startup_clear(chip)?;
                self_test(chip)
            }
            rc => rc,
        }
    }

    fn command_attributes(&self, chip: &dyn CommandChannel) -> TpmResult<Option<CcAttrTable>> {
        let nr_commands =
            get_tpm_pt(chip, TPM2_PT_TOTAL_COMMANDS, "attempting to determine the command count")? as usize;
        let min_body = 9 + TPM_HANDLE_SIZE * nr_commands;
        if TPM_HEADER_SIZE + min_body > TPM_BUFSIZE {
            return Err(TpmError::ShortResponse { len: TPM_BUFSIZE, expected: TPM_HEADER_SIZE + min_body });
        }

        let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_GET_CAPABILITY);
        buf.append_u32(TPM2_CAP_COMMANDS);
        buf.append_u32(TPM2_CC_FIRST);
        buf.append_u32(nr_commands as u32);
        chip.transmit_buf(&mut buf, min_body, TransmitFlags::empty(), "attempting to read the command attributes")?;

        let mut body = buf.body();
        body.skip(5)?;
        let count = body.u32()? as usize;
        if count > nr_commands {
            debug!("device listed {count} commands, {nr_commands} expected");
            return Err(TpmError::ShortResponse { len: buf.len(), expected: TPM_HEADER_SIZE + 9 + 4 * count });
        }

        let mut attrs = Vec::with_capacity(count);
        for _ in 0..count {
            let mut raw = body.u32()?;
            // Both take their handle as a parameter; it still needs translating.
            if matches!(raw & 0xFFFF, TPM2_CC_CONTEXT_SAVE | TPM2_CC_FLUSH_CONTEXT) {
                raw = (raw & !(0b111 << CC_ATTR_CHANDLES)) | (1 << CC_ATTR_CHANDLES);
            }
            attrs.push(raw);
        }
        Ok(Some(CcAttrTable::new(attrs)))
    }

    fn pcr_allocation(&self, chip: &dyn CommandChannel) -> TpmResult<Option<BankTable>> {
        let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_GET_CAPABILITY);
        buf.append_u32(TPM2_CAP_PCRS);
        buf.append_u32(0);
        buf.append_u32(1);
        chip.transmit_buf(&mut buf, 9, TransmitFlags::empty(), "attempting to read the PCR allocation")?;

        let mut body = buf.body();
        body.skip(5)?;
        let count = body.u32()? as usize;
        let mut banks = BankTable::new();
        for _ in 0..count {
            let alg = body.u16()?;
            let size_of_select = body.u8()?;
            body.skip(usize::from(size_of_select))?;
            banks
                .try_push(alg)
                .map_err(|_| TpmError::TooManyBanks { count, capacity: TPM_MAX_ACTIVE_BANKS })?;
        }
        Ok(Some(banks))
    }

    fn pcr_read(&self, chip: &dyn CommandChannel, pcr_idx: u32, out: &mut [u8; TPM_DIGEST_SIZE]) -> TpmResult<()> {
        if pcr_idx >= TPM2_PLATFORM_PCR {
            return Err(TpmError::InvalidArgument);
        }
        let mut select = [0u8; TPM2_PCR_SELECT_MIN];
        select[(pcr_idx >> 3) as usize] = 1 << (pcr_idx & 0x7);

        let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_PCR_READ);
        buf.append_u32(1);
        buf.append_u16(TPM_ALG_SHA1);
        buf.append_u8(TPM2_PCR_SELECT_MIN as u8);
        buf.append(&select);
        chip.transmit_buf(&mut buf, 0, TransmitFlags::empty(), "attempting to read a pcr value")?;

        let mut body = buf.body();
        body.skip(4)?;
        for _ in 0..body.u32()? {
            body.skip(2)?;
            let n = body.u8()?;
            body.skip(usize::from(n))?;
        }
        if body.u32()? == 0 {
            return Err(TpmError::NoData);
        }
        let digest = body.sized()?;
        if digest.len() != TPM_DIGEST_SIZE {
            return Err(TpmError::ShortResponse { len: digest.len(), expected: TPM_DIGEST_SIZE });
        }
        out.copy_from_slice(digest);
        Ok(())
    }

    fn pcr_extend(&self, chip: &dyn CommandChannel, pcr_idx: u32, digests: &[TpmDigest]) -> TpmResult<()> {
        if digests.len() > TPM_MAX_ACTIVE_BANKS {
            return Err(TpmError::TooManyBanks { count: digests.len(), capacity: TPM_MAX_ACTIVE_BANKS });
        }

        let mut buf = TpmBuf::new(TPM2_ST_SESSIONS, TPM2_CC_PCR_EXTEND);
        buf.append_u32(pcr_idx);
        append_auth(&mut buf, TPM2_RS_PW, 0, &[]);
        buf.append_u32(digests.len() as u32);
        for digest in digests {
            let bytes = digest.as_bytes().ok_or(TpmError::InvalidArgument)?;
            buf.append_u16(digest.alg_id);
            buf.append(bytes);
        }
        chip.transmit_buf(&mut buf, 0, TransmitFlags::empty(), "attempting extend a PCR value")?;
        Ok(())
    }

    fn get_random(&self, chip: &dyn CommandChannel, out: &mut [u8]) -> TpmResult<usize> {
        if out.is_empty() || out.len() > TPM_MAX_RNG_DATA {
            return Err(TpmError::InvalidArgument);
        }

        let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_GET_RANDOM);
        let mut total = 0;
        let mut retries = 5;
        loop {
            let wanted = out.len() - total;
            buf.reset(TPM2_ST_NO_SESSIONS, TPM2_CC_GET_RANDOM);
            buf.append_u16(wanted as u16);
            chip.transmit_buf(&mut buf, 2, TransmitFlags::empty(), "attempting get random")?;

            let data = buf.body().sized()?;
            let recd = data.len().min(wanted);
            out[total..total + recd].copy_from_slice(&data[..recd]);
            total += recd;

            if total >= out.len() || retries == 0 {
                break;
            }
            retries -= 1;
        }

        if total == 0 { Err(TpmError::NoData) } else { Ok(total) }
    }

    fn pm_suspend(&self, chip: &dyn CommandChannel, _suspend_pcr: u32) -> TpmResult<()> {
        let mut buf = TpmBuf::new(TPM2_ST_NO_SESSIONS, TPM2_CC_SHUTDOWN);
        buf.append_u16(TPM2_SU_STATE);
        if let Err(e) = chip.transmit_buf(&mut buf, 0, TransmitFlags::empty(), "stopping the TPM") {
            debug!("shutdown before suspend: {e}");
        }
        Ok(())
    }

    fn seal_trusted(
        &self,
        chip: &dyn CommandChannel,
        payload: &mut TrustedKeyPayload,
        options: &TrustedKeyOptions,
    ) -> TpmResult<()> {
        if digest_size(options.hash).is_none() || payload.key.len() > MAX_KEY_SIZE {
            return Err(TpmError::InvalidArgument);
        }

        let mut buf = TpmBuf::new(TPM2_ST_SESSIONS, TPM2_CC_CREATE);
        buf.append_u32(options.key_handle);
        append_auth(&mut buf, TPM2_RS_PW, 0, &options.key_auth);

        // sensitive
        buf.append_u16((4 + options.blob_auth.len() + payload.key.len() + 1) as u16);
        buf.append_sized(&options.blob_auth);
        buf.append_u16((payload.key.len() + 1) as u16);
        buf.append(&payload.key);
        buf.append_u8(u8::from(payload.migratable));

        // public
        let mut attributes = 0;
        if !payload.migratable {
            attributes |= TPM2_OA_FIXED_TPM | TPM2_OA_FIXED_PARENT;
        }
        if options.policy_digest.is_empty() {
            attributes |= TPM2_OA_USER_WITH_AUTH;
        }
        buf.append_u16((14 + options.policy_digest.len()) as u16);
        buf.append_u16(TPM_ALG_KEYEDHASH);
        buf.append_u16(options.hash);
        buf.append_u32(attributes);
        buf.append_sized(&options.policy_digest);
        buf.append_u16(TPM_ALG_NULL);
        buf.append_u16(0);

        // outside info
        buf.append_u16(0);
        // creation PCR
        buf.append_u32(0);

        chip.transmit_buf(&mut buf, 4, TransmitFlags::empty(), "sealing data").map_err(|e| match e {
            TpmError::Tpm(rc) if rc_value(rc) == TPM2_RC_HASH => TpmError::InvalidArgument,
            e => e,
        })?;

        let mut body = buf.body();
        let blob_len = body.u32()? as usize;
        if blob_len > MAX_BLOB_SIZE {
            return Err(TpmError::CommandTooLarge { count: blob_len, bufsiz: MAX_BLOB_SIZE });
        }
        payload.blob = body.bytes(blob_len)?.to_vec();
        Ok(())
    }

    fn unseal_trusted(
        &self,
        chip: &dyn CommandChannel,
        payload: &mut TrustedKeyPayload,
        options: &TrustedKeyOptions,
    ) -> TpmResult<()> {
        let _bus = chip.lock_bus();
        let handle = load(chip, payload, options)?;
        let rc = unseal(chip, payload, options, handle);
        flush_context(chip, handle);
        rc
    }
}
