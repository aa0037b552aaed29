/// Instruction seeding each generation conversation. The reasoning service
/// is expected to draft LaTeX, call the worker's compile tool, and surface
/// the resulting artifact URL through a tool result.
pub fn build_instruction(document_content: &str, target_description: &str) -> String {
    format!(
        "You are an expert document editor who has adapted thousands of documents \
for every kind of audience.\n\
I have the source content of a document and a description of the target it should \
be adapted for. Your task is to:\n\n\
1. Analyze the document's content.\n\
2. Understand the requirements and emphasis of the target description.\n\
3. Choose a LaTeX layout suited to presenting this content for that target.\n\
4. Rework the content to fit the layout, emphasizing what the target cares about.\n\
5. Compile the reworked LaTeX document into a PDF.\n\
6. Return the compiled PDF as the final response.\n\n\
Here is the document content:\n{document_content}\n\n\
Here is the target description:\n{target_description}\n\n\
Please process this information, generate the LaTeX document accordingly, and \
compile it to PDF."
    )
}
