//! Session settings carried by the `INIT` message.
//!
//! The engine packs its negotiated boolean settings into the low 32 bits
//! of a 64-bit field; the high word is reserved and forwarded untouched.

use bitflags::bitflags;

bitflags! {
    /// Boolean engine settings, one bit each, in wire order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InitFlags: u32 {
        const SUPPORT_GRAPHICS_PIPELINE = 1 << 0;
        const GFX_H264                  = 1 << 1;
        const GFX_AVC444                = 1 << 2;
        const GFX_AVC444_V2             = 1 << 3;
        const GFX_PROGRESSIVE           = 1 << 4;
        const GFX_PROGRESSIVE_V2        = 1 << 5;
        const REMOTE_FX_CODEC           = 1 << 6;
        const NS_CODEC                  = 1 << 7;
        const JPEG_CODEC                = 1 << 8;
        const GFX_PLANAR                = 1 << 9;
        const GFX_SMALL_CACHE           = 1 << 10;
        const GFX_THIN_CLIENT           = 1 << 11;
        const GFX_SEND_QOE_ACK          = 1 << 12;
        const GFX_SUSPEND_FRAME_ACK     = 1 << 13;
        const AUDIO_PLAYBACK            = 1 << 14;
        const AUDIO_CAPTURE             = 1 << 15;
        const REMOTE_CONSOLE_AUDIO      = 1 << 16;
    }
}

impl InitFlags {
    /// Setting names as the browser client spells them, paired with
    /// their bit.
    pub const NAMED: [(&'static str, InitFlags); 17] = [
        ("SupportGraphicsPipeline", InitFlags::SUPPORT_GRAPHICS_PIPELINE),
        ("GfxH264", InitFlags::GFX_H264),
        ("GfxAVC444", InitFlags::GFX_AVC444),
        ("GfxAVC444v2", InitFlags::GFX_AVC444_V2),
        ("GfxProgressive", InitFlags::GFX_PROGRESSIVE),
        ("GfxProgressiveV2", InitFlags::GFX_PROGRESSIVE_V2),
        ("RemoteFxCodec", InitFlags::REMOTE_FX_CODEC),
        ("NSCodec", InitFlags::NS_CODEC),
        ("JpegCodec", InitFlags::JPEG_CODEC),
        ("GfxPlanar", InitFlags::GFX_PLANAR),
        ("GfxSmallCache", InitFlags::GFX_SMALL_CACHE),
        ("GfxThinClient", InitFlags::GFX_THIN_CLIENT),
        ("GfxSendQoeAck", InitFlags::GFX_SEND_QOE_ACK),
        ("GfxSuspendFrameAck", InitFlags::GFX_SUSPEND_FRAME_ACK),
        ("AudioPlayback", InitFlags::AUDIO_PLAYBACK),
        ("AudioCapture", InitFlags::AUDIO_CAPTURE),
        ("RemoteConsoleAudio", InitFlags::REMOTE_CONSOLE_AUDIO),
    ];

    /// Names of the settings that are switched on.
    pub fn enabled_names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMED
            .into_iter()
            .filter(move |(_, flag)| self.contains(*flag))
            .map(|(name, _)| name)
    }
}
