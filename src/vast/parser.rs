//! VAST XML parsing built on quick-xml pull events.

use crate::error::{AdCueError, Result};
use crate::vast::model::{
    Ad, CompanionCreative, CompanionVariation, Creative, CreativeKind, Delivery, LinearCreative,
    MediaFile, TrackingEvent, VastResponse,
};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{info, warn};

/// Parse VAST XML into structured data
pub fn parse_vast(xml: &str) -> Result<VastResponse> {
    let mut reader = Reader::from_str(xml);

    let mut version = String::new();
    let mut ads = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VAST" => {
                version = get_attr(e, "version").unwrap_or_default();
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Ad" => {
                let id = get_attr(e, "id").unwrap_or_default();
                let sequence = get_attr(e, "sequence").and_then(|s| s.parse().ok());
                if let Some(ad) = parse_ad(&mut reader, id, sequence)? {
                    ads.push(ad);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("VAST", e)),
            _ => {}
        }
    }

    if ads.is_empty() {
        info!("VAST {} response contains no ads (empty response)", version);
    } else {
        info!("Parsed {} ad(s) from VAST {} response", ads.len(), version);
    }

    Ok(VastResponse { version, ads })
}

/// Parse a single <Ad> element into a flat inline or wrapper ad
fn parse_ad(reader: &mut Reader<&[u8]>, id: String, sequence: Option<u32>) -> Result<Option<Ad>> {
    let mut ad = Ad {
        id,
        sequence,
        ..Default::default()
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"InLine" => {
                parse_ad_body(reader, &mut ad, "InLine")?;
                return Ok(Some(ad));
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Wrapper" => {
                parse_ad_body(reader, &mut ad, "Wrapper")?;
                if ad.ad_tag_uri.is_none() {
                    warn!("Wrapper ad {} has no VASTAdTagURI, dropping", ad.id);
                    return Ok(None);
                }
                return Ok(Some(ad));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => return Ok(None),
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(parse_error("Ad", e)),
            _ => {}
        }
    }
}

/// Parse the shared body of <InLine> and <Wrapper> elements
fn parse_ad_body(reader: &mut Reader<&[u8]>, ad: &mut Ad, end_tag: &str) -> Result<()> {
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"AdSystem" => {
                ad.ad_system = read_text(reader, "AdSystem")?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"AdTitle" => {
                ad.ad_title = read_text(reader, "AdTitle")?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VASTAdTagURI" => {
                let uri = read_text(reader, "VASTAdTagURI")?;
                if !uri.is_empty() {
                    ad.ad_tag_uri = Some(uri);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Impression" => {
                let url = read_text(reader, "Impression")?;
                if !url.is_empty() {
                    ad.impression_urls.push(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Error" => {
                ad.error_url = Some(read_text(reader, "Error")?);
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creatives" => {
                ad.creatives = parse_creatives(reader)?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == end_tag.as_bytes() => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(end_tag, e)),
            _ => {}
        }
    }

    Ok(())
}

/// Parse <Creatives> element
fn parse_creatives(reader: &mut Reader<&[u8]>) -> Result<Vec<Creative>> {
    let mut creatives = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creative" => {
                let id = get_attr(e, "id").unwrap_or_default();
                if let Some(creative) = parse_creative(reader, id)? {
                    creatives.push(creative);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creatives" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("Creatives", e)),
            _ => {}
        }
    }

    Ok(creatives)
}

/// Parse a single <Creative> element into a linear or companion creative.
/// Creatives of other kinds (non-linear overlays) are dropped.
fn parse_creative(reader: &mut Reader<&[u8]>, id: String) -> Result<Option<Creative>> {
    let mut kind = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Linear" => {
                kind = Some(CreativeKind::Linear(parse_linear(reader)?));
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"CompanionAds" => {
                kind = Some(CreativeKind::Companion(parse_companion_ads(reader)?));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creative" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("Creative", e)),
            _ => {}
        }
    }

    Ok(kind.map(|kind| Creative { id, kind }))
}

/// Parse <Linear> element
fn parse_linear(reader: &mut Reader<&[u8]>) -> Result<LinearCreative> {
    let mut linear = LinearCreative::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Duration" => {
                let dur_str = read_text(reader, "Duration")?;
                linear.duration = parse_duration(&dur_str);
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MediaFiles" => {
                linear.media_files = parse_media_files(reader)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"TrackingEvents" => {
                linear.tracking_events = parse_tracking_events(reader)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VideoClicks" => {
                parse_video_clicks(reader, &mut linear)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"AdParameters" => {
                linear.ad_parameters = Some(read_text(reader, "AdParameters")?);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Linear" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("Linear", e)),
            _ => {}
        }
    }

    Ok(linear)
}

/// Parse <VideoClicks> element
fn parse_video_clicks(reader: &mut Reader<&[u8]>, linear: &mut LinearCreative) -> Result<()> {
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"ClickThrough" => {
                let url = read_text(reader, "ClickThrough")?;
                if !url.is_empty() {
                    linear.click_through = Some(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"ClickTracking" => {
                let url = read_text(reader, "ClickTracking")?;
                if !url.is_empty() {
                    linear.click_tracking_urls.push(url);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VideoClicks" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("VideoClicks", e)),
            _ => {}
        }
    }

    Ok(())
}

/// Parse <MediaFiles> element
fn parse_media_files(reader: &mut Reader<&[u8]>) -> Result<Vec<MediaFile>> {
    let mut files = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MediaFile" => {
                let delivery =
                    Delivery::from_attr(&get_attr(e, "delivery").unwrap_or_default());
                let mime_type = get_attr(e, "type").unwrap_or_default();
                let width = get_attr(e, "width")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let height = get_attr(e, "height")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let bitrate = get_attr(e, "bitrate").and_then(|s| s.parse().ok());
                let api_framework = get_attr(e, "apiFramework");

                let url = read_text(reader, "MediaFile")?.trim().to_string();

                files.push(MediaFile {
                    url,
                    delivery,
                    mime_type,
                    width,
                    height,
                    bitrate,
                    api_framework,
                });
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"MediaFiles" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("MediaFiles", e)),
            _ => {}
        }
    }

    Ok(files)
}

/// Parse <CompanionAds> element
fn parse_companion_ads(reader: &mut Reader<&[u8]>) -> Result<CompanionCreative> {
    let mut companion = CompanionCreative::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Companion" => {
                let width = get_attr(e, "width")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let height = get_attr(e, "height")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let variation = parse_companion(reader, width, height)?;
                companion.variations.push(variation);
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"TrackingEvents" => {
                companion.tracking_events = parse_tracking_events(reader)?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"CompanionAds" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("CompanionAds", e)),
            _ => {}
        }
    }

    Ok(companion)
}

/// Parse a single <Companion> variation
fn parse_companion(
    reader: &mut Reader<&[u8]>,
    width: u32,
    height: u32,
) -> Result<CompanionVariation> {
    let mut variation = CompanionVariation {
        width,
        height,
        ..Default::default()
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"StaticResource" => {
                variation.mime_type = get_attr(e, "creativeType").unwrap_or_default();
                let url = read_text(reader, "StaticResource")?;
                if !url.is_empty() {
                    variation.static_resource = Some(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"CompanionClickThrough" => {
                let url = read_text(reader, "CompanionClickThrough")?;
                if !url.is_empty() {
                    variation.click_through = Some(url);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Companion" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("Companion", e)),
            _ => {}
        }
    }

    Ok(variation)
}

/// Parse <TrackingEvents> element
fn parse_tracking_events(reader: &mut Reader<&[u8]>) -> Result<Vec<TrackingEvent>> {
    let mut events = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Tracking" => {
                let event = get_attr(e, "event").unwrap_or_default();
                let url = read_text(reader, "Tracking")?.trim().to_string();
                events.push(TrackingEvent { event, url });
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"TrackingEvents" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error("TrackingEvents", e)),
            _ => {}
        }
    }

    Ok(events)
}

/// Parse VAST duration format "HH:MM:SS" or "HH:MM:SS.mmm" to seconds
pub fn parse_duration(duration: &str) -> f64 {
    let parts: Vec<&str> = duration.trim().split(':').collect();
    match parts.len() {
        3 => {
            let hours: f64 = parts[0].parse().unwrap_or(0.0);
            let minutes: f64 = parts[1].parse().unwrap_or(0.0);
            let seconds: f64 = parts[2].parse().unwrap_or(0.0);
            hours * 3600.0 + minutes * 60.0 + seconds
        }
        _ => {
            warn!("Invalid VAST duration format: {}", duration);
            0.0
        }
    }
}

/// Read text content from current element, handling CDATA
fn read_text(reader: &mut Reader<&[u8]>, end_tag: &str) -> Result<String> {
    let mut text = String::new();
    let end_tag_bytes = end_tag.as_bytes();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::CData(e)) => {
                text.push_str(std::str::from_utf8(&e).unwrap_or_default());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == end_tag_bytes => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(end_tag, e)),
            _ => {}
        }
    }

    Ok(text.trim().to_string())
}

/// Get attribute value from an XML element
fn get_attr(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| String::from_utf8(a.value.to_vec()).ok())
}

fn parse_error(context: &str, e: quick_xml::Error) -> AdCueError {
    AdCueError::VastParse(format!("error in {}: {}", context, e))
}
