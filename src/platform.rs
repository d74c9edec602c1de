// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Discovery of the video accelerators present on a Rockchip SoC.
//!
//! The SoC is identified from the device-tree compatible string, which gives
//! a first guess of its accelerators. Unless the unified `mpp_service` driver
//! is present, that guess is then checked against the device nodes the
//! kernel actually exposes.

use std::fs;
use std::path::Path;

use enumn::N;
use nix::unistd::access;
use nix::unistd::AccessFlags;

/// Client types of the kernel driver. The discriminant is also the bit of the
/// capability mask announcing support for the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, N)]
#[repr(u32)]
pub enum ClientType {
    Vdpu1 = 0,
    Vdpu2 = 1,
    Vdpu1Pp = 2,
    Vdpu2Pp = 3,
    HevcDec = 8,
    Rkvdec = 9,
    AvsplusDec = 12,
    Rkvenc = 16,
    Vepu1 = 17,
    Vepu2 = 18,
    Vepu2Lite = 19,
    Vepu22 = 24,
}

/// Set of [`ClientType`]s available on a platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn with(self, client: ClientType) -> Self {
        Self(self.0 | (1 << client as u32))
    }

    pub const fn without(self, client: ClientType) -> Self {
        Self(self.0 & !(1 << client as u32))
    }

    pub const fn has(&self, client: ClientType) -> bool {
        self.0 & (1 << client as u32) != 0
    }

    fn set(self, client: ClientType, present: bool) -> Self {
        if present {
            self.with(client)
        } else {
            self.without(client)
        }
    }

    /// Clients present in the mask, lowest bit first.
    pub fn clients(&self) -> impl Iterator<Item = ClientType> + '_ {
        (0..32)
            .filter(|bit| self.0 & (1 << bit) != 0)
            .filter_map(ClientType::n)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocType {
    Rk3036,
    Rk3066,
    Rk3188,
    Rk3288,
    Rk312x,
    Rk3368,
    Rk3399,
    Rk3228h,
    Rk3328,
    Rk3228,
    Rk3229,
    Rv1108,
    Rv1109,
    Rv1126,
    Rk3326,
    Rk3128h,
    Rk1808,
}

use ClientType::*;

const VPU1: Capabilities = Capabilities::empty().with(Vdpu1).with(Vepu1);
const VPU2: Capabilities = Capabilities::empty().with(Vdpu2).with(Vepu2);

/// Compatible substring, SoC and accelerators. Entries are matched in order,
/// so a name must come before any of its prefixes.
const SOC_TABLE: &[(&str, SocType, Capabilities)] = &[
    ("rk3036", SocType::Rk3036, VPU1.with(HevcDec)),
    ("rk3066", SocType::Rk3066, VPU1),
    ("rk3188", SocType::Rk3188, VPU1),
    ("rk3288", SocType::Rk3288, VPU1.with(HevcDec)),
    ("rk3126", SocType::Rk312x, VPU1.with(HevcDec)),
    ("rk3128h", SocType::Rk3128h, VPU2.with(Rkvdec)),
    ("rk3128", SocType::Rk312x, VPU1.with(HevcDec)),
    ("rk3368", SocType::Rk3368, VPU1.with(HevcDec)),
    ("rk3399", SocType::Rk3399, VPU2.with(Rkvdec)),
    (
        "rk3228h",
        SocType::Rk3228h,
        VPU2.with(Rkvdec).with(AvsplusDec).with(Vepu22),
    ),
    ("rk3328", SocType::Rk3328, VPU2.with(Rkvdec).with(Vepu22)),
    ("rk3228", SocType::Rk3228, VPU2.with(Rkvdec)),
    ("rk3229", SocType::Rk3229, VPU2.with(Rkvdec)),
    ("rv1108", SocType::Rv1108, VPU2.with(Rkvdec).with(Rkvenc)),
    ("rv1109", SocType::Rv1109, VPU2.with(Rkvdec).with(Rkvenc)),
    ("rv1126", SocType::Rv1126, VPU2.with(Rkvdec).with(Rkvenc)),
    ("rk3326", SocType::Rk3326, VPU2.with(HevcDec)),
    ("px30", SocType::Rk3326, VPU2.with(HevcDec)),
    ("rk1808", SocType::Rk1808, VPU2),
];

const MPP_SERVICE_DEV: &[&str] = &["/dev/mpp_service"];
const VPU_DEV: &[&str] = &["/dev/vpu_service", "/dev/vpu-service", "/dev/mpp_service"];
const HEVC_DEV: &[&str] = &["/dev/hevc_service", "/dev/hevc-service", "/dev/mpp_service"];
const RKVDEC_DEV: &[&str] = &["/dev/rkvdec", "/dev/mpp_service"];
const RKVENC_DEV: &[&str] = &["/dev/rkvenc", "/dev/mpp_service"];
const AVSD_DEV: &[&str] = &["/dev/avsd", "/dev/mpp_service"];
const VEPU_DEV: &[&str] = &["/dev/vepu", "/dev/mpp_service"];
const H265E_DEV: &[&str] = &["/dev/h265e", "/dev/mpp_service"];

const SOC_NAME_PATH: &str = "/proc/device-tree/compatible";

/// Tells whether a device node exists.
pub trait DeviceProbe {
    fn exists(&self, node: &str) -> bool;
}

/// Probes the real filesystem.
pub struct FsProbe;

impl DeviceProbe for FsProbe {
    fn exists(&self, node: &str) -> bool {
        access(Path::new(node), AccessFlags::F_OK).is_ok()
    }
}

fn find_device(probe: &impl DeviceProbe, candidates: &[&'static str]) -> Option<&'static str> {
    candidates.iter().copied().find(|node| probe.exists(node))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionType {
    Decoder,
    Encoder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coding {
    Avc,
    Hevc,
    Vp8,
    Vp9,
    Avs,
    Mjpeg,
}

#[derive(Clone, Debug)]
pub struct Platform {
    soc_name: String,
    soc_type: Option<SocType>,
    capabilities: Capabilities,
    mpp_service: bool,
}

impl Platform {
    /// Reads the SoC name from the device tree and probes the filesystem.
    pub fn detect() -> Self {
        let soc_name = match fs::read(SOC_NAME_PATH) {
            // Compatible strings are NUL separated.
            Ok(raw) => String::from_utf8_lossy(&raw)
                .trim_end_matches('\0')
                .replace('\0', " "),
            Err(e) => {
                log::error!("Cannot read {}: {}", SOC_NAME_PATH, e);
                String::from("unknown")
            }
        };

        Self::new(&soc_name, &FsProbe)
    }

    pub fn new(soc_name: &str, probe: &impl DeviceProbe) -> Self {
        let (soc_type, mut capabilities) = match SOC_TABLE
            .iter()
            .find(|(compatible, _, _)| soc_name.contains(compatible))
        {
            Some((_, soc_type, capabilities)) => (Some(*soc_type), *capabilities),
            None => {
                log::info!("No known SoC in {:?}, assuming vpu1", soc_name);
                // Old chips without device tree entries.
                (None, VPU1)
            }
        };

        let mpp_service = find_device(probe, MPP_SERVICE_DEV).is_some();
        if !mpp_service {
            // Device trees do not always describe every accelerator, and may
            // use a compatible string we do not know. Trust the device nodes.
            let present = |candidates| find_device(probe, candidates).is_some();
            capabilities = capabilities
                .set(HevcDec, present(HEVC_DEV))
                .set(Rkvdec, present(RKVDEC_DEV))
                .set(AvsplusDec, present(AVSD_DEV))
                .set(Rkvenc, present(RKVENC_DEV))
                .set(Vepu2Lite, present(VEPU_DEV))
                .set(Vepu22, present(H265E_DEV));
            if !present(VPU_DEV) {
                capabilities = capabilities
                    .without(Vdpu1)
                    .without(Vepu1)
                    .without(Vdpu2)
                    .without(Vepu2);
            }
        }

        log::debug!(
            "SoC {:?} ({:?}): capabilities 0x{:08x}, mpp_service {}",
            soc_name,
            soc_type,
            capabilities.bits(),
            mpp_service
        );

        Self {
            soc_name: soc_name.to_string(),
            soc_type,
            capabilities,
            mpp_service,
        }
    }

    pub fn soc_name(&self) -> &str {
        &self.soc_name
    }

    pub fn soc_type(&self) -> Option<SocType> {
        self.soc_type
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether the unified `mpp_service` driver is in use.
    pub fn has_mpp_service(&self) -> bool {
        self.mpp_service
    }

    /// Device node serving a session of `session` type for `coding`.
    pub fn device_node(
        &self,
        session: SessionType,
        coding: Coding,
        probe: &impl DeviceProbe,
    ) -> Option<&'static str> {
        if let Some(node) = find_device(probe, MPP_SERVICE_DEV) {
            return Some(node);
        }

        let caps = self.capabilities;
        let decoder = session == SessionType::Decoder;
        let encoder = session == SessionType::Encoder;
        if caps.has(Rkvdec)
            && decoder
            && matches!(coding, Coding::Avc | Coding::Hevc | Coding::Vp9)
        {
            find_device(probe, RKVDEC_DEV)
        } else if caps.has(HevcDec) && decoder && coding == Coding::Hevc {
            find_device(probe, HEVC_DEV)
        } else if caps.has(AvsplusDec) && decoder && coding == Coding::Avs {
            find_device(probe, AVSD_DEV)
        } else if caps.has(Rkvenc) && encoder && coding == Coding::Avc {
            find_device(probe, RKVENC_DEV)
        } else if caps.has(Vepu22) && encoder && coding == Coding::Hevc {
            find_device(probe, H265E_DEV)
        } else if caps.has(Vepu2Lite) && encoder && matches!(coding, Coding::Avc | Coding::Mjpeg)
        {
            find_device(probe, VEPU_DEV)
        } else {
            let vepu = if encoder {
                find_device(probe, VEPU_DEV)
            } else {
                None
            };
            vepu.or_else(|| find_device(probe, VPU_DEV))
        }
    }

    /// Client type to register with the driver for HEVC decoding.
    pub fn hevc_decoder_client(&self) -> Option<ClientType> {
        if self.capabilities.has(Rkvdec) {
            Some(Rkvdec)
        } else if self.capabilities.has(HevcDec) {
            Some(HevcDec)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe(&'static [&'static str]);

    impl DeviceProbe for FakeProbe {
        fn exists(&self, node: &str) -> bool {
            self.0.iter().any(|candidate| *candidate == node)
        }
    }

    #[test]
    fn capability_bits() {
        let caps = Capabilities::empty().with(Rkvdec).with(Vdpu2);
        assert_eq!(caps.bits(), (1 << 9) | (1 << 1));
        assert!(caps.has(Rkvdec));
        assert!(!caps.without(Rkvdec).has(Rkvdec));
        assert_eq!(caps.clients().collect::<Vec<_>>(), vec![Vdpu2, Rkvdec]);
        assert_eq!(ClientType::n(24), Some(Vepu22));
    }

    #[test]
    fn mpp_service_skips_double_check() {
        let probe = FakeProbe(&["/dev/mpp_service"]);
        let platform = Platform::new("rockchip,rk3399-evb rockchip,rk3399", &probe);

        assert_eq!(platform.soc_type(), Some(SocType::Rk3399));
        assert!(platform.has_mpp_service());
        assert_eq!(platform.capabilities(), VPU2.with(Rkvdec));
        assert_eq!(
            platform.device_node(SessionType::Decoder, Coding::Hevc, &probe),
            Some("/dev/mpp_service")
        );
        assert_eq!(platform.hevc_decoder_client(), Some(Rkvdec));
    }

    #[test]
    fn longer_compatible_wins() {
        let probe = FakeProbe(&["/dev/mpp_service"]);
        let platform = Platform::new("rockchip,rk3228h", &probe);
        assert_eq!(platform.soc_type(), Some(SocType::Rk3228h));
        assert!(platform.capabilities().has(AvsplusDec));
    }

    #[test]
    fn legacy_nodes() {
        let probe = FakeProbe(&["/dev/vpu_service", "/dev/hevc_service"]);
        let platform = Platform::new("rockchip,rk3288", &probe);

        assert!(!platform.has_mpp_service());
        assert!(platform.capabilities().has(HevcDec));
        assert!(platform.capabilities().has(Vdpu1));
        assert!(!platform.capabilities().has(Rkvdec));
        assert_eq!(
            platform.device_node(SessionType::Decoder, Coding::Hevc, &probe),
            Some("/dev/hevc_service")
        );
        assert_eq!(
            platform.device_node(SessionType::Decoder, Coding::Avc, &probe),
            Some("/dev/vpu_service")
        );
        assert_eq!(platform.hevc_decoder_client(), Some(HevcDec));
    }

    #[test]
    fn missing_nodes_remove_capabilities() {
        let probe = FakeProbe(&["/dev/rkvdec"]);
        let platform = Platform::new("rockchip,rk3399", &probe);

        assert!(platform.capabilities().has(Rkvdec));
        assert!(!platform.capabilities().has(Vdpu2));
        assert!(!platform.capabilities().has(Vepu2));
        assert_eq!(
            platform.device_node(SessionType::Decoder, Coding::Vp9, &probe),
            Some("/dev/rkvdec")
        );
        assert_eq!(
            platform.device_node(SessionType::Encoder, Coding::Avc, &probe),
            None
        );
    }

    #[test]
    fn unknown_soc() {
        let probe = FakeProbe(&["/dev/mpp_service"]);
        let platform = Platform::new("acme,widget", &probe);
        assert_eq!(platform.soc_type(), None);
        assert_eq!(platform.capabilities(), VPU1);
    }
}
