//! `PdfRasterizer` — the native PDF rasterizer and cropper Extract treats as
//! a black-box subroutine. The production adapter shells out to
//! `poppler-utils` (`pdfinfo`, `pdftotext -bbox`, `pdftoppm`); no raster
//! image-manipulation crate is available in this workspace, so instead of one
//! full-page raster plus in-memory cropping, each question crop is its own
//! `pdftoppm` invocation using poppler's native `-x/-y/-W/-H` pixel crop-box
//! arguments (`pixels = points / 72 * dpi`).

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    NonZeroExit {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not parse {tool} output: {0}")]
    UnexpectedOutput(&'static str, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One line of text recovered from a page, with the y-coordinate (in PDF
/// points, top-down) of its bounding box — the unit marker detection scans.
#[derive(Debug, Clone, PartialEq)]
pub struct LineText {
    pub y_min: f32,
    pub text: String,
}

#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, pdf_path: &Path) -> Result<u32, RasterError>;

    /// Page dimensions in PDF points (width, height), needed to convert a
    /// marker's point-space y-coordinate into a pixel crop box at a given DPI.
    async fn page_size_pt(&self, pdf_path: &Path, page: u32) -> Result<(f32, f32), RasterError>;

    /// Every text line on `page`, in reading order, each carrying its
    /// bounding box's y_min — the raw material marker detection runs against.
    async fn page_lines(&self, pdf_path: &Path, page: u32) -> Result<Vec<LineText>, RasterError>;

    /// Rasterize `page` at `dpi` and crop the vertical span
    /// `[y_top_pt, y_bottom_pt)` (full page width, in PDF points; `None`
    /// bottom means "to the end of the page"), writing one PNG to
    /// `output_path`.
    async fn crop_page(
        &self,
        pdf_path: &Path,
        page: u32,
        dpi: u32,
        y_top_pt: f32,
        y_bottom_pt: Option<f32>,
        output_path: &Path,
    ) -> Result<(), RasterError>;
}

/// Shells out to `pdfinfo`, `pdftotext -bbox`, and `pdftoppm`.
pub struct PopplerRasterizer;

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self
    }

    fn points_to_pixels(points: f32, dpi: u32) -> i64 {
        ((points / 72.0) * dpi as f32).round() as i64
    }
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(tool: &'static str, args: &[&str]) -> Result<String, RasterError> {
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .stdout(Stdio::piped())
        .output()
        .await
        .map_err(|source| RasterError::Spawn { tool, source })?;

    if !output.status.success() {
        return Err(RasterError::NonZeroExit {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl PdfRasterizer for PopplerRasterizer {
    async fn page_count(&self, pdf_path: &Path) -> Result<u32, RasterError> {
        let path = pdf_path.display().to_string();
        let stdout = run("pdfinfo", &[&path]).await?;
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Pages:") {
                return rest
                    .trim()
                    .parse()
                    .map_err(|_| RasterError::UnexpectedOutput("pdfinfo", line.to_string()));
            }
        }
        Err(RasterError::UnexpectedOutput(
            "pdfinfo",
            "no Pages: line".to_string(),
        ))
    }

    async fn page_size_pt(&self, pdf_path: &Path, page: u32) -> Result<(f32, f32), RasterError> {
        let path = pdf_path.display().to_string();
        let page_str = page.to_string();
        let stdout = run(
            "pdfinfo",
            &["-f", &page_str, "-l", &page_str, &path],
        )
        .await?;
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Page size:") {
                // "   595.32 x 841.92 pts" (possibly with a trailing "(A4)").
                let mut parts = rest.split_whitespace();
                let width = parts.next().and_then(|s| s.parse::<f32>().ok());
                let x = parts.next();
                let height = parts.next().and_then(|s| s.parse::<f32>().ok());
                if let (Some(w), Some("x"), Some(h)) = (width, x, height) {
                    return Ok((w, h));
                }
                return Err(RasterError::UnexpectedOutput("pdfinfo", line.to_string()));
            }
        }
        Err(RasterError::UnexpectedOutput(
            "pdfinfo",
            "no Page size: line".to_string(),
        ))
    }

    async fn page_lines(&self, pdf_path: &Path, page: u32) -> Result<Vec<LineText>, RasterError> {
        let path = pdf_path.display().to_string();
        let page_str = page.to_string();
        let xml = run(
            "pdftotext",
            &["-bbox", "-f", &page_str, "-l", &page_str, &path, "-"],
        )
        .await?;
        Ok(parse_bbox_lines(&xml))
    }

    async fn crop_page(
        &self,
        pdf_path: &Path,
        page: u32,
        dpi: u32,
        y_top_pt: f32,
        y_bottom_pt: Option<f32>,
        output_path: &Path,
    ) -> Result<(), RasterError> {
        let (width_pt, height_pt) = self.page_size_pt(pdf_path, page).await?;
        let bottom_pt = y_bottom_pt.unwrap_or(height_pt).min(height_pt);
        let top_pt = y_top_pt.max(0.0).min(bottom_pt);

        let x = 0i64;
        let y = Self::points_to_pixels(top_pt, dpi);
        let w = Self::points_to_pixels(width_pt, dpi).max(1);
        let h = Self::points_to_pixels(bottom_pt - top_pt, dpi).max(1);

        let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let tmp_dir = tempfile::Builder::new()
            .prefix("pipeline-crop-")
            .tempdir_in(parent)
            .map_err(RasterError::Io)?;
        let prefix = tmp_dir.path().join("crop");
        let prefix_str = prefix.display().to_string();
        let pdf_str = pdf_path.display().to_string();
        let page_str = page.to_string();
        let dpi_str = dpi.to_string();
        let x_str = x.to_string();
        let y_str = y.to_string();
        let w_str = w.to_string();
        let h_str = h.to_string();

        run(
            "pdftoppm",
            &[
                "-png",
                "-r",
                &dpi_str,
                "-f",
                &page_str,
                "-l",
                &page_str,
                "-x",
                &x_str,
                "-y",
                &y_str,
                "-W",
                &w_str,
                "-H",
                &h_str,
                "-singlefile",
                &pdf_str,
                &prefix_str,
            ],
        )
        .await?;

        let produced = prefix.with_extension("png");
        tokio::fs::rename(&produced, output_path).await?;
        Ok(())
    }
}

/// Parse `pdftotext -bbox`'s XML-like `<line xMin=.. yMin=.. ...><word>..
/// </word>...</line>` stream into one [`LineText`] per `<line>`, by
/// concatenating its words and reading the line's own `yMin`.
fn parse_bbox_lines(xml: &str) -> Vec<LineText> {
    let mut lines = Vec::new();
    let mut rest = xml;

    while let Some(line_start) = rest.find("<line ") {
        rest = &rest[line_start..];
        let Some(tag_end) = rest.find('>') else { break };
        let attrs = &rest[..tag_end];
        let y_min = extract_attr(attrs, "yMin").unwrap_or(0.0);

        let Some(line_close) = rest.find("</line>") else {
            break;
        };
        let body = &rest[tag_end + 1..line_close];

        let mut words = Vec::new();
        let mut body_rest = body;
        while let Some(word_start) = body_rest.find("<word") {
            body_rest = &body_rest[word_start..];
            let Some(word_tag_end) = body_rest.find('>') else {
                break;
            };
            let Some(word_close) = body_rest.find("</word>") else {
                break;
            };
            let text = &body_rest[word_tag_end + 1..word_close];
            words.push(decode_entities(text));
            body_rest = &body_rest[word_close + "</word>".len()..];
        }

        lines.push(LineText {
            y_min,
            text: words.join(" "),
        });

        rest = &rest[line_close + "</line>".len()..];
    }

    lines
}

fn extract_attr(attrs: &str, name: &str) -> Option<f32> {
    let needle = format!("{name}=\"");
    let start = attrs.find(&needle)? + needle.len();
    let end = attrs[start..].find('"')? + start;
    attrs[start..end].parse().ok()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bbox_lines_and_concatenates_words() {
        let xml = r#"
            <page width="595" height="842">
                <line xMin="10" yMin="120.5" xMax="200" yMax="135">
                    <word xMin="10" yMin="120.5" xMax="40" yMax="135">12</word>
                    <word xMin="45" yMin="120.5" xMax="90" yMax="135">pont</word>
                </line>
                <line xMin="10" yMin="200" xMax="300" yMax="215">
                    <word xMin="10" yMin="200" xMax="90" yMax="215">Kérdés</word>
                </line>
            </page>
        "#;
        let lines = parse_bbox_lines(xml);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].y_min, 120.5);
        assert_eq!(lines[0].text, "12 pont");
        assert_eq!(lines[1].text, "Kérdés");
    }

    #[test]
    fn points_to_pixels_scales_by_dpi_over_72() {
        assert_eq!(PopplerRasterizer::points_to_pixels(72.0, 150), 150);
        assert_eq!(PopplerRasterizer::points_to_pixels(36.0, 150), 75);
    }
}
