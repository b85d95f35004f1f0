//! Well-known metadata keys set and read by the built-in modules.

// ReadFiles
pub const SOURCE_FILE_ROOT: &str = "SourceFileRoot";
pub const SOURCE_FILE_BASE: &str = "SourceFileBase";
pub const SOURCE_FILE_EXT: &str = "SourceFileExt";
pub const SOURCE_FILE_NAME: &str = "SourceFileName";
pub const SOURCE_FILE_DIR: &str = "SourceFileDir";
pub const SOURCE_FILE_PATH: &str = "SourceFilePath";
pub const SOURCE_FILE_PATH_BASE: &str = "SourceFilePathBase";

// ReadFiles and WriteFiles, relative to the input or output path
pub const RELATIVE_FILE_PATH: &str = "RelativeFilePath";
pub const RELATIVE_FILE_PATH_BASE: &str = "RelativeFilePathBase";
pub const RELATIVE_FILE_DIR: &str = "RelativeFileDir";

// Read by WriteFiles, in precedence order
pub const WRITE_PATH: &str = "WritePath";
pub const WRITE_FILE_NAME: &str = "WriteFileName";
pub const WRITE_EXTENSION: &str = "WriteExtension";

// WriteFiles
pub const DESTINATION_FILE_BASE: &str = "DestinationFileBase";
pub const DESTINATION_FILE_EXT: &str = "DestinationFileExt";
pub const DESTINATION_FILE_NAME: &str = "DestinationFileName";
pub const DESTINATION_FILE_DIR: &str = "DestinationFileDir";
pub const DESTINATION_FILE_PATH: &str = "DestinationFilePath";
pub const DESTINATION_FILE_PATH_BASE: &str = "DestinationFilePathBase";
