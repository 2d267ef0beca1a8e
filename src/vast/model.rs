//! VAST data model shared by the parser, fetcher, selector and trackers.

/// Parsed VAST response containing ads
#[derive(Debug, Clone, Default)]
pub struct VastResponse {
    pub version: String,
    pub ads: Vec<Ad>,
}

/// A single ad from a VAST response.
///
/// Wrapper ads carry `ad_tag_uri` and no usable creatives of their own;
/// the fetcher resolves them into inline ads before anything downstream
/// sees the response.
#[derive(Debug, Clone, Default)]
pub struct Ad {
    pub id: String,
    /// Pod sequence number (ads carrying one play back-to-back, in order)
    pub sequence: Option<u32>,
    pub ad_system: String,
    pub ad_title: String,
    /// Redirect to another VAST tag, set for Wrapper ads only
    pub ad_tag_uri: Option<String>,
    pub creatives: Vec<Creative>,
    pub impression_urls: Vec<String>,
    pub error_url: Option<String>,
}

impl Ad {
    pub fn is_wrapper(&self) -> bool {
        self.ad_tag_uri.is_some()
    }

    /// First creative with linear content and at least one media file
    pub fn linear_creative(&self) -> Option<&Creative> {
        self.creatives
            .iter()
            .find(|c| c.as_linear().is_some_and(|l| !l.media_files.is_empty()))
    }

    /// First companion creative, if any
    pub fn companion_creative(&self) -> Option<&Creative> {
        self.creatives.iter().find(|c| c.as_companion().is_some())
    }
}

/// A creative within an ad
#[derive(Debug, Clone)]
pub struct Creative {
    pub id: String,
    pub kind: CreativeKind,
}

/// Linear (primary media stream) or companion (static side asset)
#[derive(Debug, Clone)]
pub enum CreativeKind {
    Linear(LinearCreative),
    Companion(CompanionCreative),
}

impl Creative {
    pub fn as_linear(&self) -> Option<&LinearCreative> {
        match &self.kind {
            CreativeKind::Linear(linear) => Some(linear),
            _ => None,
        }
    }

    pub fn as_companion(&self) -> Option<&CompanionCreative> {
        match &self.kind {
            CreativeKind::Companion(companion) => Some(companion),
            _ => None,
        }
    }
}

/// Linear (video) ad content
#[derive(Debug, Clone, Default)]
pub struct LinearCreative {
    /// Duration in seconds, 0 when the document omits or mangles it
    pub duration: f64,
    pub media_files: Vec<MediaFile>,
    pub tracking_events: Vec<TrackingEvent>,
    pub click_through: Option<String>,
    pub click_tracking_urls: Vec<String>,
    /// Opaque initialization payload for interactive (VPAID) creatives
    pub ad_parameters: Option<String>,
}

impl LinearCreative {
    /// True iff at least one media file plays without an interactive sandbox
    pub fn has_video_media(&self) -> bool {
        self.media_files.iter().any(|m| m.api_framework.is_none())
    }
}

/// A single media file for an ad creative
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFile {
    pub url: String,
    pub delivery: Delivery,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: Option<u32>,
    /// "VPAID" marks an asset that must run inside an execution sandbox
    pub api_framework: Option<String>,
}

const VPAID_MIME_TYPES: [&str; 3] = [
    "application/x-javascript",
    "text/javascript",
    "application/javascript",
];

impl MediaFile {
    /// JavaScript VPAID asset suitable for the sandbox handler
    pub fn is_vpaid(&self) -> bool {
        self.api_framework.as_deref() == Some("VPAID")
            && VPAID_MIME_TYPES.contains(&self.mime_type.trim())
    }
}

/// Media delivery type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Progressive,
    Streaming,
}

impl Delivery {
    pub fn from_attr(value: &str) -> Self {
        if value.eq_ignore_ascii_case("streaming") {
            Delivery::Streaming
        } else {
            Delivery::Progressive
        }
    }
}

/// Companion (banner) ad content
#[derive(Debug, Clone, Default)]
pub struct CompanionCreative {
    pub variations: Vec<CompanionVariation>,
    pub tracking_events: Vec<TrackingEvent>,
}

/// One rendition of a companion creative
#[derive(Debug, Clone, Default)]
pub struct CompanionVariation {
    pub static_resource: Option<String>,
    /// Mime type of the static resource (`creativeType` attribute)
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub click_through: Option<String>,
}

impl CompanionVariation {
    pub fn is_static_image(&self) -> bool {
        self.static_resource.is_some() && self.mime_type.starts_with("image")
    }
}

/// Tracking event for ad playback reporting
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingEvent {
    pub event: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(api_framework: Option<&str>, mime: &str) -> MediaFile {
        MediaFile {
            url: "https://example.com/a".into(),
            mime_type: mime.into(),
            api_framework: api_framework.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_has_video_media() {
        let plain = LinearCreative {
            media_files: vec![media(None, "video/mp4")],
            ..Default::default()
        };
        assert!(plain.has_video_media());

        let vpaid_only = LinearCreative {
            media_files: vec![media(Some("VPAID"), "application/javascript")],
            ..Default::default()
        };
        assert!(!vpaid_only.has_video_media());

        let mixed = LinearCreative {
            media_files: vec![
                media(Some("VPAID"), "application/javascript"),
                media(None, "video/mp4"),
            ],
            ..Default::default()
        };
        assert!(mixed.has_video_media());
    }

    #[test]
    fn test_is_vpaid_requires_javascript_mime() {
        assert!(media(Some("VPAID"), "application/javascript").is_vpaid());
        assert!(media(Some("VPAID"), " text/javascript ").is_vpaid());
        assert!(!media(Some("VPAID"), "video/mp4").is_vpaid());
        assert!(!media(None, "application/javascript").is_vpaid());
    }

    #[test]
    fn test_linear_creative_lookup_skips_empty_media() {
        let ad = Ad {
            creatives: vec![
                Creative {
                    id: "c1".into(),
                    kind: CreativeKind::Linear(LinearCreative::default()),
                },
                Creative {
                    id: "c2".into(),
                    kind: CreativeKind::Linear(LinearCreative {
                        media_files: vec![media(None, "video/mp4")],
                        ..Default::default()
                    }),
                },
            ],
            ..Default::default()
        };
        assert_eq!(ad.linear_creative().map(|c| c.id.as_str()), Some("c2"));
    }
}
