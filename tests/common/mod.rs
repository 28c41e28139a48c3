#![allow(dead_code)]

use async_trait::async_trait;
use site_extractor::extraction::exif::ExifError;
use site_extractor::extraction::geocoding::AddressParts;
use site_extractor::extraction::metadata::GpsFix;
use site_extractor::extraction::{
    ClientError, CompanyEnricher, CompanyQuery, Enrichment, GeoLocation, GeocodingError,
    MetadataError, MetadataSource, PhotoMetadata, ReverseGeocoder, VisionExtraction,
    VisionExtractor,
};
use site_extractor::{
    ApiService, ApiUsage, CompanyEnrichment, CompanyFields, ExtractedSite, ExtractionPipeline,
    ImageStore, InMemoryStore, ProjectFields, StorageUri,
};

use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const JPEG_BYTES: [u8; 12] = [
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01,
];

pub struct Workspace {
    pub uploads: TempDir,
    pub images: ImageStore,
    pub store: Arc<InMemoryStore>,
    _root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let images = ImageStore::new(StorageUri::parse(root.path().to_str().unwrap()).unwrap());

        Self {
            uploads,
            images,
            store: Arc::new(InMemoryStore::new()),
            _root: root,
        }
    }

    /// Writes a minimal JPEG the vision clients accept.
    pub fn photo(&self, name: &str) -> PathBuf {
        let path = self.uploads.path().join(name);
        std::fs::write(&path, JPEG_BYTES).unwrap();
        path
    }

    /// Writes a JPEG whose APP1 segment carries `fields`.
    pub fn exif_photo(&self, name: &str, fields: &[Field]) -> PathBuf {
        let path = self.uploads.path().join(name);
        std::fs::write(&path, exif_jpeg(fields)).unwrap();
        path
    }

    pub fn pipeline(
        &self,
        metadata: Arc<dyn MetadataSource>,
        vision: Arc<dyn VisionExtractor>,
    ) -> ExtractionPipeline {
        ExtractionPipeline::new(self.images.clone(), self.store.clone(), metadata, vision)
    }
}

pub fn exif_jpeg(fields: &[Field]) -> Vec<u8> {
    let mut writer = Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let segment_len = u16::try_from(2 + 6 + tiff.len()).unwrap();
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&segment_len.to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

pub fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

/// Degrees, minutes and hundredths of seconds as an EXIF rational triple.
pub fn dms(tag: Tag, degrees: u32, minutes: u32, centiseconds: u32) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(vec![
            Rational { num: degrees, denom: 1 },
            Rational { num: minutes, denom: 1 },
            Rational { num: centiseconds, denom: 100 },
        ]),
    }
}

/// A fix on Piazza del Duomo, Milan: 45°27'51.12" N, 9°11'24" E.
pub fn milano_gps_fields() -> Vec<Field> {
    vec![
        dms(Tag::GPSLatitude, 45, 27, 5112),
        ascii(Tag::GPSLatitudeRef, "N"),
        dms(Tag::GPSLongitude, 9, 11, 2400),
        ascii(Tag::GPSLongitudeRef, "E"),
    ]
}

pub fn rossi_site() -> ExtractedSite {
    ExtractedSite {
        raw_text: Some("IMPRESA ESECUTRICE: ROSSI COSTRUZIONI SRL - P.IVA 12345678901".into()),
        company: CompanyFields {
            company_name: Some("Rossi Costruzioni Srl".into()),
            vat_number: Some("12345678901".into()),
            phone_number: Some("0444123456".into()),
            ..Default::default()
        },
        project: ProjectFields {
            construction_type: Some("Nuova costruzione residenziale".into()),
            project_amount: Some(1_250_000.0),
            ..Default::default()
        },
        confidence_score: 0.88,
    }
}

pub fn milano_metadata() -> PhotoMetadata {
    PhotoMetadata {
        has_metadata: true,
        gps: Some(GpsFix {
            latitude: 45.4642,
            longitude: 9.19,
            altitude: None,
            coordinates_string: "45.4642, 9.19".into(),
        }),
        location: Some(GeoLocation {
            address: AddressParts {
                road: Some("Via Roma".into()),
                postcode: Some("20121".into()),
                city: Some("Milano".into()),
                province: Some("MI".into()),
                ..Default::default()
            },
            formatted_address: "Via Roma, 20121 Milano, (MI)".into(),
            ..Default::default()
        }),
        datetime: None,
        device: None,
    }
}

pub enum MetadataBehavior {
    Returns(PhotoMetadata),
    Fails,
}

pub struct StaticMetadata(pub MetadataBehavior);

impl StaticMetadata {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self(MetadataBehavior::Returns(PhotoMetadata::empty())))
    }

    pub fn with(metadata: PhotoMetadata) -> Arc<Self> {
        Arc::new(Self(MetadataBehavior::Returns(metadata)))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self(MetadataBehavior::Fails))
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn extract(&self, _image_path: &Path) -> Result<PhotoMetadata, MetadataError> {
        match &self.0 {
            MetadataBehavior::Returns(metadata) => Ok(metadata.clone()),
            MetadataBehavior::Fails => Err(ExifError::InvalidGpsFormat("truncated GPS block".into()).into()),
        }
    }
}

pub enum VisionBehavior {
    Extracts(ExtractedSite),
    ApiError(u16, &'static str),
}

pub struct MockVision {
    pub behavior: VisionBehavior,
    pub calls: AtomicUsize,
}

impl MockVision {
    pub fn extracting(site: ExtractedSite) -> Arc<Self> {
        Arc::new(Self {
            behavior: VisionBehavior::Extracts(site),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(status: u16, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            behavior: VisionBehavior::ApiError(status, message),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VisionExtractor for MockVision {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn extract(&self, _image_path: &Path) -> Result<VisionExtraction, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            VisionBehavior::Extracts(site) => Ok(VisionExtraction {
                site: site.clone(),
                rejections: Vec::new(),
                usage: vec![ApiUsage::new(ApiService::Anthropic, 1500, 300)],
            }),
            VisionBehavior::ApiError(status, message) => Err(ClientError::Api {
                service: ApiService::Anthropic,
                status: *status,
                message: message.to_string(),
            }),
        }
    }
}

pub enum EnricherBehavior {
    Answers(CompanyEnrichment),
    ApiError,
}

pub struct MockEnricher {
    pub behavior: EnricherBehavior,
    pub calls: AtomicUsize,
    pub last_query: std::sync::Mutex<Option<CompanyQuery>>,
}

impl MockEnricher {
    pub fn answering(data: CompanyEnrichment) -> Arc<Self> {
        Arc::new(Self {
            behavior: EnricherBehavior::Answers(data),
            calls: AtomicUsize::new(0),
            last_query: std::sync::Mutex::new(None),
        })
    }

    pub fn not_found() -> Arc<Self> {
        Self::answering(CompanyEnrichment::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            behavior: EnricherBehavior::ApiError,
            calls: AtomicUsize::new(0),
            last_query: std::sync::Mutex::new(None),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanyEnricher for MockEnricher {
    async fn enrich(&self, query: &CompanyQuery) -> Result<Enrichment, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());

        match &self.behavior {
            EnricherBehavior::Answers(data) => Ok(Enrichment {
                data: data.clone(),
                rejections: Vec::new(),
                usage: ApiUsage::new(ApiService::Perplexity, 900, 350),
            }),
            EnricherBehavior::ApiError => Err(ClientError::Api {
                service: ApiService::Perplexity,
                status: 429,
                message: "rate limited".into(),
            }),
        }
    }
}


pub struct MockGeocoder {
    pub answer: Option<GeoLocation>,
    pub calls: AtomicUsize,
}

impl MockGeocoder {
    pub fn answering(location: GeoLocation) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(location),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReverseGeocoder for MockGeocoder {
    async fn reverse_geocode(&self, _latitude: f64, _longitude: f64) -> Result<GeoLocation, GeocodingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Some(location) => Ok(location.clone()),
            None => Err(GeocodingError::Api {
                status: 503,
                message: "Service Unavailable".into(),
            }),
        }
    }
}
