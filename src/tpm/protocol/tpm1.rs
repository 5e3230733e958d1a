use log::{debug, error, info, warn};

use super::TpmProtocol;
use crate::tpm::buf::TpmBuf;
use crate::tpm::constants::*;
use crate::tpm::error::{TpmError, TpmResult};
use crate::tpm::ops::CommandChannel;
use crate::tpm::types::{Timing, TpmDigest, TpmDuration, TpmTimeout, TpmVersion, TransmitFlags};

/// Interval between PCR reads while the self test runs.
const SELFTEST_POLL_MS: u64 = 100;

/// TPM 1.2 command set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tpm1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DurationClass {
    Short,
    Medium,
    Long,
}

fn ordinal_class(ordinal: u32) -> Option<DurationClass> {
    use DurationClass::*;

    match ordinal {
        10 | 11 | 16 | 17 | 25 | 26 | 28 | 29 | 33..=35 | 43..=48 | 84 => Some(Short),
        TPM_ORD_PCR_EXTEND | TPM_ORD_PCR_READ | TPM_ORD_GET_RANDOM | TPM_ORD_GET_CAP | TPM_ORD_STARTUP => {
            Some(Short)
        }
        12 | 15 | 18 | 22..=24 | 27 | 30 | 32 | 36 | 37 | 40 | 42 | 50 | 51 | 82 | TPM_ORD_SAVESTATE => {
            Some(Medium)
        }
        13 | 14 | 19 | 31 | 41 | 49 | TPM_ORD_SELFTEST_FULL | TPM_ORD_CONTINUE_SELFTEST => Some(Long),
        _ => None,
    }
}

fn transmit(chip: &dyn CommandChannel, buf: &mut TpmBuf, min_body: usize, desc: Option<&str>) -> TpmResult<usize> {
    buf.check()?;
    chip.transmit_cmd(None, buf.as_mut_slice(), min_body, TransmitFlags::empty(), desc)
}

/// TPM_GetCapability(TPM_CAP_PROP, `subcap`). The returned buffer's body is
/// a 32-bit size followed by the property.
fn getcap(chip: &dyn CommandChannel, subcap: u32, min_len: usize, desc: Option<&str>) -> TpmResult<TpmBuf> {
    let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_GET_CAP);
    buf.append_u32(TPM_CAP_PROP);
    buf.append_u32(4);
    buf.append_u32(subcap);
    transmit(chip, &mut buf, 4 + min_len, desc)?;
    Ok(buf)
}

fn startup_clear(chip: &dyn CommandChannel) -> TpmResult<()> {
    let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_STARTUP);
    buf.append_u16(TPM_ST_CLEAR);
    transmit(chip, &mut buf, 0, Some("attempting to start the TPM"))?;
    Ok(())
}

fn continue_selftest(chip: &dyn CommandChannel) -> TpmResult<()> {
    let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_CONTINUE_SELFTEST);
    transmit(chip, &mut buf, 0, Some("continue selftest"))?;
    Ok(())
}

fn pcr_read(
    chip: &dyn CommandChannel,
    pcr_idx: u32,
    out: &mut [u8; TPM_DIGEST_SIZE],
    desc: Option<&str>,
) -> TpmResult<()> {
    let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_PCR_READ);
    buf.append_u32(pcr_idx);
    transmit(chip, &mut buf, TPM_DIGEST_SIZE, desc)?;
    out.copy_from_slice(buf.body().bytes(TPM_DIGEST_SIZE)?);
    Ok(())
}

fn pcr_extend(chip: &dyn CommandChannel, pcr_idx: u32, hash: &[u8], desc: &str) -> TpmResult<()> {
    let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_PCR_EXTEND);
    buf.append_u32(pcr_idx);
    buf.append(hash);
    transmit(chip, &mut buf, TPM_DIGEST_SIZE, Some(desc))?;
    Ok(())
}

/// Microseconds as reported by the device, rounded up to milliseconds.
fn us_to_ms(us: u64) -> u64 {
    us.div_ceil(1000)
}

fn read_timeouts(chip: &dyn CommandChannel) -> TpmResult<TpmTimeout> {
    let buf = match getcap(chip, TPM_CAP_PROP_TIS_TIMEOUT, 16, None) {
        Err(TpmError::Tpm(TPM_ERR_INVALID_POSTINIT)) => {
            startup_clear(chip).map_err(|_| TpmError::Tpm(TPM_ERR_INVALID_POSTINIT))?;
            getcap(chip, TPM_CAP_PROP_TIS_TIMEOUT, 16, None)
        }
        rc => rc,
    }
    .inspect_err(|e| error!("A TPM error ({e}) occurred attempting to determine the timeouts"))?;

    let mut body = buf.body();
    body.skip(4)?;
    let defaults = [TIMEOUT_A, TIMEOUT_B, TIMEOUT_C, TIMEOUT_D].map(|ms| ms * 1000);
    let mut us = [0u64; 4];
    for (t, default) in us.iter_mut().zip(defaults) {
        *t = match body.u32()? {
            0 => default,
            reported => u64::from(reported),
        };
    }
    // Some devices report milliseconds instead of microseconds.
    if us[0] < 1000 {
        debug!("scaling TPM timeouts reported in milliseconds");
        us.iter_mut().for_each(|t| *t *= 1000);
    }

    Ok(TpmTimeout {
        timeout_a: us_to_ms(us[0]),
        timeout_b: us_to_ms(us[1]),
        timeout_c: us_to_ms(us[2]),
        timeout_d: us_to_ms(us[3]),
    })
}

fn read_durations(chip: &dyn CommandChannel) -> TpmResult<TpmDuration> {
    let buf = getcap(chip, TPM_CAP_PROP_TIS_DURATION, 12, Some("attempting to determine the durations"))?;
    let mut body = buf.body();
    body.skip(4)?;
    let mut duration = TpmDuration {
        short: us_to_ms(u64::from(body.u32()?)),
        medium: us_to_ms(u64::from(body.u32()?)),
        long: us_to_ms(u64::from(body.u32()?)),
        long_long: 0,
    };

    // Durations this short mean the device reported milliseconds too.
    if duration.short < 10 {
        duration.short = 1000;
        duration.medium *= 1000;
        duration.long *= 1000;
        info!("Adjusting TPM timeout parameters.");
    }
    Ok(duration)
}

impl TpmProtocol for Tpm1 {
    fn version(&self) -> TpmVersion {
        TpmVersion::Tpm1
    }

    fn ordinal_duration(&self, timing: &Timing, ordinal: u32) -> u64 {
        match ordinal_class(ordinal) {
            Some(DurationClass::Short) => timing.duration.short,
            Some(DurationClass::Medium) => timing.duration.medium,
            Some(DurationClass::Long) => timing.duration.long,
            None => TPM1_DURATION_UNDEFINED,
        }
    }

    fn get_timeouts(&self, chip: &dyn CommandChannel) -> TpmResult<Timing> {
        let timeout = read_timeouts(chip)?;
        let duration = read_durations(chip)?;
        Ok(Timing { timeout, duration })
    }

    fn startup(&self, chip: &dyn CommandChannel, timing: &Timing) -> TpmResult<()> {
        let loops = (self.ordinal_duration(timing, TPM_ORD_CONTINUE_SELFTEST) / SELFTEST_POLL_MS).max(1);

        continue_selftest(chip).inspect_err(|e| error!("TPM self test failed: {e}"))?;

        let mut rc = Ok(());
        for _ in 0..loops {
            let mut dummy = [0u8; TPM_DIGEST_SIZE];
            rc = pcr_read(chip, 0, &mut dummy, None);
            match rc {
                Err(TpmError::Timeout) => info!("TPM command timed out during continue self test"),
                Err(TpmError::Tpm(TPM_WARN_DOING_SELFTEST)) => {}
                _ => break,
            }
            chip.timer().msleep(SELFTEST_POLL_MS);
        }
        if let Err(e) = rc {
            error!("TPM self test failed: {e}");
        }
        rc
    }

    fn pcr_read(&self, chip: &dyn CommandChannel, pcr_idx: u32, out: &mut [u8; TPM_DIGEST_SIZE]) -> TpmResult<()> {
        pcr_read(chip, pcr_idx, out, Some("attempting to read a pcr value"))
    }

    fn pcr_extend(&self, chip: &dyn CommandChannel, pcr_idx: u32, digests: &[TpmDigest]) -> TpmResult<()> {
        let sha1 = digests.iter().find(|d| d.alg_id == TPM_ALG_SHA1).ok_or(TpmError::InvalidArgument)?;
        pcr_extend(chip, pcr_idx, &sha1.digest[..TPM_DIGEST_SIZE], "attempting extend a PCR value")
    }

    fn get_random(&self, chip: &dyn CommandChannel, out: &mut [u8]) -> TpmResult<usize> {
        if out.is_empty() || out.len() > TPM_MAX_RNG_DATA {
            return Err(TpmError::InvalidArgument);
        }

        let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_GET_RANDOM);
        let mut total = 0;
        let mut retries = 5;
        loop {
            let wanted = out.len() - total;
            buf.reset(TPM_TAG_RQU_COMMAND, TPM_ORD_GET_RANDOM);
            buf.append_u32(wanted as u32);
            transmit(chip, &mut buf, 4, Some("attempting get random"))?;

            let mut body = buf.body();
            let recd = body.u32()? as usize;
            if recd > wanted {
                return Err(TpmError::ShortResponse { len: recd, expected: wanted });
            }
            out[total..total + recd].copy_from_slice(body.bytes(recd)?);
            total += recd;

            if total >= out.len() || retries == 0 {
                break;
            }
            retries -= 1;
        }

        if total == 0 { Err(TpmError::NoData) } else { Ok(total) }
    }

    fn pm_suspend(&self, chip: &dyn CommandChannel, suspend_pcr: u32) -> TpmResult<()> {
        // Flush buggy devices' PCR state with a dummy extend first.
        if suspend_pcr != 0 {
            let dummy = [0u8; TPM_DIGEST_SIZE];
            if let Err(e) = pcr_extend(chip, suspend_pcr, &dummy, "extending dummy pcr before suspend") {
                debug!("dummy extend of PCR {suspend_pcr}: {e}");
            }
        }

        let mut rc = Ok(0);
        let mut tries = 0;
        while tries < TPM_RETRY {
            let mut buf = TpmBuf::new(TPM_TAG_RQU_COMMAND, TPM_ORD_SAVESTATE);
            rc = transmit(chip, &mut buf, 0, None);
            if rc != Err(TpmError::Tpm(TPM_WARN_RETRY)) {
                break;
            }
            chip.timer().msleep(TPM_TIMEOUT_RETRY);
            tries += 1;
        }

        match rc {
            Err(e) => error!("Error ({e}) sending savestate before suspend"),
            Ok(_) if tries > 0 => warn!("TPM savestate took {}ms", u64::from(tries) * TPM_TIMEOUT_RETRY),
            Ok(_) => {}
        }
        rc.map(|_| ())
    }
}
