use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("box for label '{label}' has out-of-range geometry: {details}"))]
    InvalidBoxGeometry {
        stage: &'static str,
        label: String,
        details: String,
    },
    #[snafu(display("box for page {page_number} has an empty label"))]
    MissingLabel { stage: &'static str, page_number: i64 },
}

pub type CoreResult<T> = Result<T, CoreError>;
