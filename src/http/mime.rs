/// Content-Type for a file path, chosen by its extension.
///
/// Any `?query` suffix is ignored. Unknown or missing extensions fall back
/// to `text/plain`.
pub fn content_type(path: &str) -> &'static str {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = name.rsplit_once('.') else {
        return "text/plain";
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "xml" => "text/xml",
        "xhtml" => "application/xhtml+xml",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "pdf" => "application/pdf",
        "word" => "application/nsword",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "au" => "audio/basic",
        "mpeg" | "mpg" => "video/mpeg",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "gz" => "application/x-gzip",
        "tar" => "application/x-tar",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        _ => "text/plain",
    }
}
